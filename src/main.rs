use std::process::exit;

use mongorows::cli::run;
use mongorows::format_fail;

fn main() {
    if let Err(error) = run() {
        let message = format_fail(&error);
        eprintln!("{}", message);
        exit(1);
    }
}
