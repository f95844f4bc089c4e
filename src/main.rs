use anyhow::Result;
use std::sync::Arc;

use chatter::{
    cli::{
        self,
        shell::{run_shell, ShellOptions},
    },
    core::WorkerConfig,
    middleware::{loopback::LoopbackMiddleware, mqtt::MqttMiddleware, CHAT_IN, CHAT_OUT},
};

fn main() -> Result<()> {
    let matches = cli::parse_args();
    chatter::boot::init_logging();

    let config = match matches.get_one::<String>("config") {
        Some(path) => WorkerConfig::from_file(path)?,
        None => WorkerConfig::default(),
    };

    let endpoints = match (
        matches.get_one::<String>("master"),
        matches.get_one::<String>("host"),
    ) {
        (Some(master), Some(host)) => Some((master.clone(), host.clone())),
        _ => None,
    };
    let options = ShellOptions {
        endpoints,
        remap_args: matches
            .get_many::<String>("remap")
            .map(|values| values.cloned().collect())
            .unwrap_or_default(),
        json: matches.get_flag("json"),
    };

    if matches.get_flag("loopback") {
        log::info!("Using the in-process loopback broker");
        let middleware = LoopbackMiddleware::new().with_route(CHAT_OUT.name, CHAT_IN.name);
        run_shell(Arc::new(middleware), config, options)
    } else {
        let middleware = MqttMiddleware::new(config.node_name.clone(), config.connect_timeout());
        run_shell(Arc::new(middleware), config, options)
    }
}
