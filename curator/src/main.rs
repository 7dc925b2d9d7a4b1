use std::process::ExitCode;

fn main() -> ExitCode {
    match curator::run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {err:#}");
            ExitCode::from(curator::exit_code(&err))
        }
    }
}
