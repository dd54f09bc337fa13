use std::str::FromStr;

use anyhow::Result;

use crate::{
    cmd::{Args, LogLevel, Port},
    init::logger,
};

pub fn init() -> Result<Args> {
    let (mut args, reminder) = Args::parse()?;
    logger::init(
        &args.log_level.take().unwrap_or(LogLevel::from_str("info")?),
        args.colored.unwrap_or(false),
    )?;
    log::debug!("{:?}, {:?}", args, reminder);

    if args.help.is_some_and(|h| h) {
        let help = Args::help();
        println!("{help}");
        std::process::exit(0);
    }

    // `proxy [PORT]`: a bare positional port overrides the `-p`/`--port`
    // flag default, matching the original's argparse `nargs="?"` port.
    if let Some(positional) = reminder.into_iter().next() {
        let port = Port::from_str(&positional)
            .map_err(|_| anyhow::anyhow!("invalid PORT argument: {positional}"))?;
        args.port = Some(port);
    }

    Ok(args)
}
