// Copyright 2016-2019 Johannes Köster, David Lähnemann.
// Licensed under the GNU GPLv3 license (https://opensource.org/licenses/GPL-3.0)
// This file may not be copied, modified, or distributed
// except according to those terms.

use std::error::Error;
use std::process;

use structopt::StructOpt;

use tagzilla::cli;

fn try_main() -> Result<(), Box<dyn Error>> {
    let opt = cli::Tagzilla::from_args();

    fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!("[{}] {}", record.level(), message))
        })
        .level(log::LevelFilter::Info)
        .chain(std::io::stderr())
        .apply()?;

    cli::run(opt)
}

fn main() {
    if let Err(e) = try_main() {
        eprintln!("error: {}", e);
        process::exit(1);
    }
}
