#[macro_use]
extern crate slog;

use futures::FutureExt;
use quorum_core::error::Result;
use quorum_core::logger::get_root_logger;
use quorum_raft::config::RaftConfig;
use quorum_raft::fsm::NullFsm;
use quorum_raft::server::RaftServer;

/// Run a raft server from the given config file until it stops or the
/// process is interrupted.
pub async fn quorum(config_path: &str) -> Result<()> {
    let logger = get_root_logger().new(o!());
    let config = RaftConfig::load(config_path)?;
    info!(logger, "configuration loaded";
          "bind" => format!("{}:{}", config.bind_address, config.port),
          "election_timeout_ms" => format!("{}..{}", config.election_timeout_min, config.election_timeout_max),
          "heartbeat_ms" => config.heartbeat_timeout,
          "peers" => config.parse_peers()?.len(),
          "var_dir" => format!("{}", config.var_dir.display()));

    let (shutdown_tx, _) = tokio::sync::broadcast::channel(1);
    let server = RaftServer::new(config, logger.new(o!()), NullFsm);
    let (task, mut server_handle) = server.run(shutdown_tx.clone()).remote_handle();
    tokio::spawn(task);

    tokio::select! {
        res = &mut server_handle => res,
        _ = tokio::signal::ctrl_c() => {
            info!(logger, "interrupted, shutting down");
            let _ = shutdown_tx.send(());
            server_handle.await
        }
    }
}
