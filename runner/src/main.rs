mod config;

use basalt::net::{Engine, EngineParams};
use clap::{App, Arg};
use config::ServerConfig;
use tuff::logging;

use std::thread;
use std::time::Duration;

fn main() {
    let matches = App::new("Basalt Server")
        .version("0.1")
        .author("Basalt Works")
        .about("Runs the basalt listen server.")
        .arg(
            Arg::with_name("CONFIG_FILE")
                .help("Path to the server config file")
                .required(false),
        )
        .arg(
            Arg::with_name("log_config")
                .long("log-config")
                .takes_value(true)
                .help("Path to the logger config file"),
        )
        .get_matches();

    // Initialize logging
    let log = match matches.value_of("log_config") {
        Some(path) => logging::init_from_file(path).expect("Error loading logger configuration file"),
        None => logging::init(),
    };

    let config = match matches.value_of("CONFIG_FILE") {
        Some(path) => {
            logging::debug!(log, "setup"; "config_file_path" => path);
            ServerConfig::load(path)
        }
        None => ServerConfig::default(),
    };

    let params = EngineParams {
        max_connections: config.max_connections,
        queue_depth: config.queue_depth,
        frame_pool_size: config.frame_pool_size,
    };

    let mut engine = match Engine::new(&params, log.clone()) {
        Ok(engine) => engine,
        Err(err) => {
            logging::crit!(log, "engine setup failed"; "error" => %err);
            std::process::exit(1);
        }
    };

    let port = match engine.listen(config.address, config.port) {
        Ok(port) => port,
        Err(err) => {
            logging::crit!(log, "could not bind the listener"; "error" => %err);
            std::process::exit(1);
        }
    };

    logging::info!(log, "server is up";
                   "address" => %config.address,
                   "port" => port,
                   "max_connections" => config.max_connections);

    loop {
        engine.poll();

        // World simulation plugs in here; for now the decoded gameplay
        // traffic is only surfaced in the logs.
        for (session, packet) in engine.drain_inbound() {
            logging::debug!(log, "gameplay packet";
                            "session" => %session,
                            "tag" => packet.tag());
        }

        engine.housekeeping();
        thread::sleep(Duration::from_micros(100));
    }
}
