// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use {
    clap::{Arg, ArgMatches, Command},
    log::LevelFilter,
    packetary::{
        drivers::DRIVER_NAMES,
        package::Package,
        relation::PackageRelation,
        CloneOptions, Configuration, CopyEvent, PacketaryError, ProgressCallback, RepositoryApi,
        Requirements,
    },
    std::{
        cmp::Ordering,
        io::Write,
        path::Path,
        sync::{Arc, Mutex},
    },
    thiserror::Error,
};

const CLONE_ABOUT: &str = "\
Clone repositories to a local directory.

Every repository given with --origin is copied below --destination,
keeping its layout. Without requirements all packages are copied.

Requirements select the minimal subset of packages to copy:

--requirements-url
   Repositories whose packages are already available. Their packages are
   not copied, but everything they depend on is.

--bootstrap
   Relations naming packages to copy, e.g. `bash` or `libc6 ge 2.14`.
   Alternatives are separated by `|`.

Packages the repository family marks as mandatory are always copied.
";

const UNRESOLVED_ABOUT: &str = "\
Print dependencies nothing satisfies.

Dependencies of packages in the --origin repositories are resolved against
those repositories and the ones given with --main.
";

const FILE_LISTS_ABOUT: &str = "Files hold one entry per line. Blank lines and lines starting with # are ignored.";

const PACKAGE_COLUMNS: &[&str] = &[
    "name",
    "repository",
    "version",
    "filename",
    "filesize",
    "checksum",
    "obsoletes",
    "provides",
    "requires",
];

const DEFAULT_PACKAGE_COLUMNS: &[&str] = &["name", "repository", "version", "filename"];

const RELATION_COLUMNS: &[&str] = &["name", "version", "alternative"];

const CELL_SEPARATOR: &str = "; ";

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("argument parsing error: {0}")]
    Clap(#[from] clap::Error),

    #[error("{0}")]
    Packetary(#[from] PacketaryError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("no repositories given; use --origin or --origin-file")]
    MissingOrigin,

    #[error("invalid sub-command: {0}")]
    InvalidSubCommand(String),
}

pub type Result<T> = std::result::Result<T, ToolError>;

/// Read a list of entries from a file.
fn read_list_file(path: &Path) -> Result<Vec<String>> {
    Ok(parse_list(&std::fs::read_to_string(path)?))
}

fn parse_list(data: &str) -> Vec<String> {
    data.lines()
        .map(|line| line.trim())
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(|line| line.to_string())
        .collect()
}

/// Collect values given inline and through list files.
fn values(args: &ArgMatches, inline: &str, file: &str) -> Result<Vec<String>> {
    let mut values = args
        .values_of(inline)
        .map(|values| values.map(|v| v.to_string()).collect::<Vec<_>>())
        .unwrap_or_default();

    if let Some(paths) = args.values_of(file) {
        for path in paths {
            values.extend(read_list_file(Path::new(path))?);
        }
    }

    Ok(values)
}

fn origin(args: &ArgMatches) -> Result<Vec<String>> {
    let origin = values(args, "origin", "origin-file")?;

    if origin.is_empty() {
        Err(ToolError::MissingOrigin)
    } else {
        Ok(origin)
    }
}

fn configuration(args: &ArgMatches) -> Result<Configuration> {
    Ok(Configuration {
        http_proxy: args.value_of("http-proxy").map(|x| x.to_string()),
        https_proxy: args.value_of("https-proxy").map(|x| x.to_string()),
        retries_num: args.value_of_t("retries-num")?,
        retry_interval: args.value_of_t("retry-interval")?,
        threads_num: args.value_of_t("threads-num")?,
        ignore_errors_num: args.value_of_t("ignore-errors-num")?,
    })
}

fn api(args: &ArgMatches) -> Result<RepositoryApi> {
    Ok(RepositoryApi::create(
        &configuration(args)?,
        args.value_of("type").unwrap_or("deb"),
        args.value_of("arch").unwrap_or("x86_64"),
    )?)
}

fn requirements(api: &RepositoryApi, args: &ArgMatches) -> Result<Option<Requirements>> {
    let repositories = values(args, "requirements-url", "requirements-file")?;
    let packages = values(args, "bootstrap", "bootstrap-file")?
        .iter()
        .map(|s| api.parse_relation(s))
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(if repositories.is_empty() && packages.is_empty() {
        None
    } else {
        Some(Requirements {
            repositories,
            packages,
        })
    })
}

fn columns<'a>(args: &'a ArgMatches, name: &str, default: &[&'a str]) -> Vec<&'a str> {
    args.values_of(name)
        .map(|values| values.collect())
        .unwrap_or_else(|| default.to_vec())
}

fn join_relations(relations: &[PackageRelation], separator: &str) -> String {
    relations
        .iter()
        .map(|r| r.to_string())
        .collect::<Vec<_>>()
        .join(separator)
}

fn package_cell(package: &Package, column: &str, separator: &str) -> String {
    match column {
        "name" => package.name.clone(),
        "repository" => package.repository.name.to_string(),
        "version" => package.version.to_string(),
        "filename" => package.filename.clone(),
        "filesize" => package.filesize.to_string(),
        "checksum" => package.checksum.to_string(),
        "obsoletes" => join_relations(&package.obsoletes, separator),
        "provides" => join_relations(&package.provides, separator),
        "requires" => join_relations(&package.requires, separator),
        _ => String::new(),
    }
}

fn compare_packages(a: &Package, b: &Package, columns: &[&str]) -> Ordering {
    columns
        .iter()
        .map(|column| match *column {
            "version" => a.version.cmp(&b.version),
            "filesize" => a.filesize.cmp(&b.filesize),
            column => package_cell(a, column, "").cmp(&package_cell(b, column, "")),
        })
        .find(|o| *o != Ordering::Equal)
        .unwrap_or(Ordering::Equal)
}

fn relation_cell(relation: &PackageRelation, column: &str) -> String {
    match column {
        "name" => relation.name.clone(),
        "version" => relation.version.to_string(),
        "alternative" => relation
            .alternative
            .as_ref()
            .map(|a| a.to_string())
            .unwrap_or_else(|| "-".to_string()),
        _ => String::new(),
    }
}

/// Write a header row followed by `rows`.
fn write_table(
    writer: &mut impl Write,
    columns: &[&str],
    rows: impl Iterator<Item = Vec<String>>,
) -> std::io::Result<()> {
    writeln!(writer, "{}", columns.join(CELL_SEPARATOR))?;

    for row in rows {
        writeln!(writer, "{}", row.join(CELL_SEPARATOR))?;
    }

    Ok(())
}

fn origin_args<'a>() -> Vec<Arg<'a>> {
    vec![
        Arg::new("origin")
            .short('o')
            .long("origin")
            .takes_value(true)
            .multiple_occurrences(true)
            .help("URL of a repository to read"),
        Arg::new("origin-file")
            .short('O')
            .long("origin-file")
            .takes_value(true)
            .multiple_occurrences(true)
            .help("File listing URLs of repositories to read"),
    ]
}

fn requirements_args<'a>() -> Vec<Arg<'a>> {
    vec![
        Arg::new("requirements-url")
            .short('r')
            .long("requirements-url")
            .takes_value(true)
            .multiple_occurrences(true)
            .help("URL of a repository whose dependencies must be satisfied"),
        Arg::new("requirements-file")
            .short('R')
            .long("requirements-file")
            .takes_value(true)
            .multiple_occurrences(true)
            .help("File listing URLs of repositories whose dependencies must be satisfied"),
        Arg::new("bootstrap")
            .short('b')
            .long("bootstrap")
            .takes_value(true)
            .multiple_occurrences(true)
            .help("Relation naming packages to include"),
        Arg::new("bootstrap-file")
            .short('B')
            .long("bootstrap-file")
            .takes_value(true)
            .multiple_occurrences(true)
            .help("File listing relations naming packages to include"),
    ]
}

pub async fn run_cli() -> Result<()> {
    let default_threads = format!("{}", num_cpus::get());

    let app = Command::new("packetary")
        .version(env!("CARGO_PKG_VERSION"))
        .author("Gregory Szorc <gregory.szorc@gmail.com>")
        .about("Mirror APT and YUM package repositories")
        .after_help(FILE_LISTS_ABOUT)
        .arg_required_else_help(true);

    let app = app
        .arg(
            Arg::new("verbose")
                .long("verbose")
                .short('v')
                .global(true)
                .multiple_occurrences(true)
                .help("Increase logging verbosity. Can be specified multiple times."),
        )
        .arg(
            Arg::new("type")
                .short('t')
                .long("type")
                .takes_value(true)
                .global(true)
                .possible_values(DRIVER_NAMES)
                .default_value("deb")
                .help("Repository family"),
        )
        .arg(
            Arg::new("arch")
                .short('a')
                .long("arch")
                .takes_value(true)
                .global(true)
                .possible_values(["x86_64", "i386"])
                .default_value("x86_64")
                .help("Architecture of packages"),
        )
        .arg(
            Arg::new("ignore-errors-num")
                .long("ignore-errors-num")
                .takes_value(true)
                .global(true)
                .default_value("2")
                .help("Number of failed downloads to tolerate"),
        )
        .arg(
            Arg::new("retries-num")
                .long("retries-num")
                .takes_value(true)
                .global(true)
                .default_value("5")
                .help("Number of times a failed request is retried"),
        )
        .arg(
            Arg::new("retry-interval")
                .long("retry-interval")
                .takes_value(true)
                .global(true)
                .default_value("2")
                .help("Base interval between retries, in seconds"),
        )
        .arg(
            Arg::new("threads-num")
                .long("threads-num")
                .takes_value(true)
                .global(true)
                .default_value(&default_threads)
                .help("Maximum number of parallel downloads"),
        )
        .arg(
            Arg::new("http-proxy")
                .long("http-proxy")
                .takes_value(true)
                .global(true)
                .help("Proxy for http:// URLs"),
        )
        .arg(
            Arg::new("https-proxy")
                .long("https-proxy")
                .takes_value(true)
                .global(true)
                .help("Proxy for https:// URLs"),
        );

    let app = app.subcommand(
        Command::new("clone")
            .about("Clone repositories to a local directory")
            .long_about(CLONE_ABOUT)
            .args(origin_args())
            .args(requirements_args())
            .arg(
                Arg::new("destination")
                    .short('d')
                    .long("destination")
                    .takes_value(true)
                    .required(true)
                    .help("Directory receiving the copies"),
            )
            .arg(
                Arg::new("clean")
                    .long("clean")
                    .help("Remove packages of the destination that are not copied"),
            )
            .arg(
                Arg::new("sources")
                    .long("sources")
                    .help("Also copy source packages"),
            )
            .arg(
                Arg::new("locales")
                    .long("locales")
                    .help("Also copy localizations"),
            ),
    );

    let app = app.subcommand(
        Command::new("packages")
            .about("Print packages of repositories")
            .args(origin_args())
            .args(requirements_args())
            .arg(
                Arg::new("columns")
                    .short('c')
                    .long("columns")
                    .takes_value(true)
                    .multiple_values(true)
                    .use_value_delimiter(true)
                    .possible_values(PACKAGE_COLUMNS)
                    .help("Columns to print"),
            )
            .arg(
                Arg::new("sort-columns")
                    .short('s')
                    .long("sort-columns")
                    .takes_value(true)
                    .multiple_values(true)
                    .use_value_delimiter(true)
                    .possible_values(PACKAGE_COLUMNS)
                    .help("Columns to sort rows by"),
            )
            .arg(
                Arg::new("sep")
                    .long("sep")
                    .takes_value(true)
                    .default_value(", ")
                    .help("Separator of values in list cells"),
            ),
    );

    let mut app = app.subcommand(
        Command::new("unresolved")
            .about("Print dependencies nothing satisfies")
            .long_about(UNRESOLVED_ABOUT)
            .args(origin_args())
            .arg(
                Arg::new("main")
                    .short('m')
                    .long("main")
                    .takes_value(true)
                    .multiple_occurrences(true)
                    .help("URL of a repository whose packages count as available"),
            )
            .arg(
                Arg::new("main-file")
                    .short('M')
                    .long("main-file")
                    .takes_value(true)
                    .multiple_occurrences(true)
                    .help("File listing URLs of repositories whose packages count as available"),
            ),
    );

    let matches = app.clone().get_matches();

    let log_level = match matches.occurrences_of("verbose") {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };

    let mut builder = env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(log_level.as_str()),
    );

    // Disable log context except at higher log levels.
    if log_level <= LevelFilter::Info {
        builder
            .format_timestamp(None)
            .format_level(false)
            .format_target(false);
    }

    builder.init();

    match matches.subcommand() {
        Some(("clone", args)) => command_clone(args).await,
        Some(("packages", args)) => command_packages(args).await,
        Some(("unresolved", args)) => command_unresolved(args).await,
        Some((command, _)) => Err(ToolError::InvalidSubCommand(command.to_string())),
        None => {
            app.print_help()?;
            Ok(())
        }
    }
}

async fn command_clone(args: &ArgMatches) -> Result<()> {
    let api = api(args)?;
    let origin = origin(args)?;
    let requirements = requirements(&api, args)?;

    let destination = args
        .value_of("destination")
        .expect("destination argument is required");

    let options = CloneOptions {
        keep_existing: !args.is_present("clean"),
        include_source: args.is_present("sources"),
        include_locale: args.is_present("locales"),
    };

    let pb = Arc::new(Mutex::new(None));

    let progress: ProgressCallback = Arc::new(move |event| {
        let mut guard = match pb.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        match event {
            CopyEvent::Begin(total) => {
                let mut bar = pbr::ProgressBar::new(total);
                bar.set_units(pbr::Units::Bytes);
                guard.replace(bar);
            }
            CopyEvent::Progress(bytes) => {
                if let Some(bar) = guard.as_mut() {
                    bar.add(bytes);
                }
            }
            CopyEvent::Finished => {
                if let Some(mut bar) = guard.take() {
                    bar.finish();
                }
            }
        }
    });

    let statistics = api
        .clone_repositories(
            &origin,
            Path::new(destination),
            requirements.as_ref(),
            &options,
            Some(progress),
        )
        .await?;

    println!("Packages copied: {}/{}", statistics.copied, statistics.total);

    Ok(())
}

async fn command_packages(args: &ArgMatches) -> Result<()> {
    let api = api(args)?;
    let origin = origin(args)?;
    let requirements = requirements(&api, args)?;

    let columns = columns(args, "columns", DEFAULT_PACKAGE_COLUMNS);
    let sort_columns = columns_or_empty(args, "sort-columns");
    let separator = args.value_of("sep").unwrap_or(", ");

    let mut packages = api.get_packages(&origin, requirements.as_ref()).await?;
    if !sort_columns.is_empty() {
        packages.sort_by(|a, b| compare_packages(a, b, &sort_columns));
    }

    write_table(
        &mut std::io::stdout().lock(),
        &columns,
        packages.iter().map(|p| {
            columns
                .iter()
                .map(|column| package_cell(p, column, separator))
                .collect()
        }),
    )?;

    Ok(())
}

fn columns_or_empty<'a>(args: &'a ArgMatches, name: &str) -> Vec<&'a str> {
    columns(args, name, &[])
}

async fn command_unresolved(args: &ArgMatches) -> Result<()> {
    let api = api(args)?;
    let origin = origin(args)?;
    let main = values(args, "main", "main-file")?;

    let unresolved = api.get_unresolved_dependencies(&origin, &main).await?;

    write_table(
        &mut std::io::stdout().lock(),
        RELATION_COLUMNS,
        unresolved.iter().map(|r| {
            RELATION_COLUMNS
                .iter()
                .map(|column| relation_cell(r, column))
                .collect()
        }),
    )?;

    Ok(())
}
