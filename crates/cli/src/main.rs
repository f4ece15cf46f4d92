use std::process::ExitCode;

fn main() -> ExitCode {
    offerflow_cli::run()
}
