use clap::{Arg, Command};
use listid_milter::classifier::{Classification, Classifier};
use listid_milter::config::{Config, Transport};
use listid_milter::listener;
use listid_milter::milter::Milter;
use log::LevelFilter;
use std::process;

#[tokio::main]
async fn main() {
    let matches = Command::new("listid-milter")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Milter that adds List-ID and List-Unsubscribe headers to mailing list messages")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path")
                .default_value("/etc/listid-milter.yaml"),
        )
        .arg(
            Arg::new("proto")
                .long("proto")
                .value_name("PROTO")
                .help("Protocol family (unix or tcp), overrides the configuration file")
                .action(clap::ArgAction::Set),
        )
        .arg(
            Arg::new("addr")
                .long("addr")
                .value_name("ADDR")
                .help("Bind to address or unix domain socket, overrides the configuration file")
                .action(clap::ArgAction::Set),
        )
        .arg(
            Arg::new("generate-config")
                .long("generate-config")
                .value_name("FILE")
                .help("Generate a default configuration file")
                .action(clap::ArgAction::Set),
        )
        .arg(
            Arg::new("test-config")
                .long("test-config")
                .help("Test configuration validity and list the rules")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("classify")
                .long("classify")
                .value_name("ADDRESS")
                .help("Show the headers that would be added for a To address")
                .action(clap::ArgAction::Set),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Enable verbose logging")
                .action(clap::ArgAction::SetTrue),
        )
        .get_matches();

    let log_level = if matches.get_flag("verbose") {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    env_logger::Builder::from_default_env()
        .filter_level(log_level)
        .init();

    if let Some(generate_path) = matches.get_one::<String>("generate-config") {
        generate_default_config(generate_path);
        return;
    }

    let config_path = matches
        .get_one::<String>("config")
        .map(String::as_str)
        .unwrap_or("/etc/listid-milter.yaml");

    let mut config = match load_config(config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error loading configuration: {e:#}");
            process::exit(1);
        }
    };

    if let Some(proto) = matches.get_one::<String>("proto") {
        config.socket.proto = match proto.parse::<Transport>() {
            Ok(proto) => proto,
            Err(e) => {
                log::error!("{e}");
                process::exit(1);
            }
        };
    }
    if let Some(addr) = matches.get_one::<String>("addr") {
        config.socket.addr = addr.clone();
    }

    if let Err(e) = config.validate() {
        log::error!("Invalid configuration: {e:#}");
        process::exit(1);
    }

    if matches.get_flag("test-config") {
        test_config(&config);
        return;
    }

    if let Some(address) = matches.get_one::<String>("classify") {
        classify_address(&config, address);
        return;
    }

    let milter = match Milter::new(&config) {
        Ok(milter) => milter,
        Err(e) => {
            log::error!("Failed to create milter: {e:#}");
            process::exit(1);
        }
    };

    let listener = match listener::bind(&config.socket).await {
        Ok(listener) => listener,
        Err(e) => {
            log::error!("{e:#}");
            process::exit(1);
        }
    };

    if let Err(e) = milter.run(listener).await {
        log::error!("Milter error: {e:#}");
        process::exit(1);
    }
}

fn load_config(path: &str) -> anyhow::Result<Config> {
    if std::path::Path::new(path).exists() {
        Config::from_file(path)
    } else {
        log::warn!("Configuration file '{path}' not found, using default configuration");
        Ok(Config::default())
    }
}

fn generate_default_config(path: &str) {
    match Config::default().to_file(path) {
        Ok(()) => {
            println!("Default configuration written to: {path}");
            println!("Please edit the list rules to suit your needs.");
        }
        Err(e) => {
            eprintln!("Error writing configuration file: {e}");
            process::exit(1);
        }
    }
}

fn test_config(config: &Config) {
    println!("Socket: {}:{} (mode {})", config.socket.proto, config.socket.addr, config.socket.mode);
    println!("Canonical list domain: {}", config.lists.canonical_list_domain);
    println!("Number of list rules: {}", config.lists.rules.len());
    for (i, rule) in config.lists.rules.iter().enumerate() {
        println!("  Rule {}: {} -> {}", i + 1, rule.describe(), rule.unsubscribe_url());
    }
    println!("Configuration is valid.");
}

fn classify_address(config: &Config, address: &str) {
    let classifier = Classifier::new(&config.lists);
    match classifier.classify(address) {
        Classification::NoMatch => println!("{address}: not a list address, no headers added"),
        classification => {
            println!("{address}: list address, adding:");
            for (name, value) in classification.list_headers() {
                println!("  {name}: {value}");
            }
        }
    }
}
