use std::process::ExitCode;

fn main() -> ExitCode {
    raidwatch_lib::run()
}
