// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

mod cli;

#[tokio::main(flavor = "multi_thread")]
async fn main() {
    let code = tokio::select! {
        res = cli::run_cli() => match res {
            Ok(_) => 0,
            Err(err) => {
                eprintln!("{}", err);
                1
            }
        },
        _ = tokio::signal::ctrl_c() => {
            eprintln!("interrupted");
            2
        }
    };

    std::process::exit(code);
}
