use meterproxy::ExitOutcome;

fn main() -> anyhow::Result<()> {
    match smol::block_on(meterproxy::run())? {
        ExitOutcome::Clean => Ok(()),
        ExitOutcome::Interrupted => std::process::exit(1),
    }
}
