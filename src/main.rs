use std::process::ExitCode;

fn main() -> ExitCode {
    daily_planner::run()
}
