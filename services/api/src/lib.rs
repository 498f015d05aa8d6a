mod cli;
mod commands;
mod infra;
mod routes;
mod server;

use permit_sync::error::AppError;

pub fn run() -> Result<(), AppError> {
    cli::run()
}
