use permit_sync_api::run;

fn main() {
    if let Err(err) = run() {
        eprintln!("application error: {err}");
        std::process::exit(1);
    }
}
