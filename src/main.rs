#[macro_use]
extern crate slog;

use clap::{crate_version, App, Arg};
use quorum_core::logger::get_root_logger;

#[tokio::main]
async fn main() {
    let matches = App::new("quorum")
        .version(crate_version!())
        .about("Replicated coordination service built on raft consensus.")
        .arg(
            Arg::with_name("config")
                .short("c")
                .long("config")
                .value_name("PATH")
                .default_value("Quorum.toml")
                .help("Path to the server configuration."),
        )
        .get_matches();
    let config_path = matches.value_of("config").unwrap();

    let logger = get_root_logger().new(o!());
    info!(logger, "booting"; "config" => config_path);

    if let Err(err) = quorum::quorum(config_path).await {
        crit!(logger, "server terminated"; "error" => format!("{}", err));
        std::process::exit(1);
    }
}
