mod config;
mod error;
mod fanout;
mod io;
mod liveness;
mod membership;
mod node;
mod protocol;
mod raft;
mod session;

use std::{path::PathBuf, process, sync::Arc};

use log::{error, info};
use tokio::net::TcpListener;

use crate::config::ClusterConfig;
use crate::error::NodeError;
use crate::io::tcp::TcpTransport;
use crate::membership::Membership;
use crate::node::Node;
use crate::session::QuestionBank;

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.len() != 2 {
        error!("Usage: trivia-node <cluster.json> <node-id>, got {args:?}");
        process::exit(2);
    }
    let config_path = PathBuf::from(&args[0]);
    let node_id = args[1].clone();
    let res = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(NodeError::from)
        .and_then(|runtime| runtime.block_on(run(config_path, node_id)));
    if let Err(err) = res {
        error!("{err}");
        process::exit(1);
    }
}

async fn run(config_path: PathBuf, node_id: String) -> Result<(), NodeError> {
    let config = ClusterConfig::load(&config_path)?;
    config.validate(&node_id)?;
    let questions = match config.questions_path {
        Some(ref path) => QuestionBank::load(path)?,
        None => {
            info!("No question file configured, using the built-in questions");
            QuestionBank::builtin()
        }
    };
    let membership = Membership::new(node_id.clone(), config.members.clone());
    let addr = membership
        .addr_of(&node_id)
        .ok_or_else(|| NodeError::Config(format!("no address for {node_id}")))?
        .to_owned();

    let transport = Arc::new(TcpTransport::new(
        membership.clone(),
        config.timing.rpc_timeout(),
    ));
    let node = Node::new(membership, config.timing, Arc::new(questions), transport.clone());
    transport.bind(&node);
    let listener = TcpListener::bind(&addr).await?;
    node.start();
    transport.serve(listener).await
}
