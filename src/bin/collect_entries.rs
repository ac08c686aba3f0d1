use std::error::Error;
use std::process::ExitCode;

fn main() -> Result<ExitCode, Box<dyn Error>> {
    match nomad_sampler::app::run_collect_entries(std::env::args().skip(1))? {
        Some(run) if !run.succeeded() => Ok(ExitCode::FAILURE),
        _ => Ok(ExitCode::SUCCESS),
    }
}
