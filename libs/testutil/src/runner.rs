use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bytestring::ByteString;
use codec::{Codec, Packet};
use futures_util::future::BoxFuture;
use serde_yaml::Value;
use service::{client_loop, MemoryStorage, Plugin, RemoteAddr, ServiceState};
use tokio::io::{DuplexStream, ReadHalf, WriteHalf};
use tokio::sync::Mutex;

use crate::suite::{Step, Suite};

struct RunnerContext {
    state: Arc<ServiceState>,
    clients: HashMap<ByteString, Codec<ReadHalf<DuplexStream>, WriteHalf<DuplexStream>>>,
}

pub async fn run<T, F>(suite: Suite, create_plugins: T)
where
    T: FnOnce(Vec<Value>) -> F,
    F: Future<Output = Vec<(&'static str, Box<dyn Plugin>)>>,
{
    let plugins = create_plugins(suite.plugins).await;
    let state = ServiceState::try_new(suite.config, Box::new(MemoryStorage::default()), plugins)
        .await
        .unwrap();
    let ctx = Arc::new(Mutex::new(RunnerContext {
        state,
        clients: HashMap::new(),
    }));

    execute_step(ctx.clone(), suite.step, None, None).await;
    ctx.lock().await.clients.clear();
}

fn execute_step(
    ctx: Arc<Mutex<RunnerContext>>,
    step: Step,
    id: Option<ByteString>,
    client_id: Option<ByteString>,
) -> BoxFuture<'static, ()> {
    let fut = async move {
        match step {
            Step::Connect { remote_addr } => {
                let id = id.expect("expect id");
                let mut ctx = ctx.lock().await;
                let (client, server) = tokio::io::duplex(4096);
                let (server_reader, server_writer) = tokio::io::split(server);
                let (client_reader, client_writer) = tokio::io::split(client);
                let codec = Codec::new(client_reader, client_writer);
                tokio::spawn(client_loop(
                    ctx.state.clone(),
                    server_reader,
                    server_writer,
                    remote_addr.unwrap_or_else(|| RemoteAddr {
                        protocol: "test".to_string(),
                        addr: Some(id.to_string()),
                    }),
                ));
                assert!(
                    ctx.clients.insert(id.clone(), codec).is_none(),
                    "client id '{}' exists",
                    id
                );
            }
            Step::Disconnect => {
                let id = id.expect("expect id");
                let mut ctx = ctx.lock().await;
                assert!(
                    ctx.clients.remove(&id).is_some(),
                    "client id '{}' not exists",
                    id
                );
            }
            Step::Send { mut packet } => {
                let id = id.expect("expect id");
                if let Packet::Connect(connect) = &mut packet {
                    connect.client_id = client_id.clone().unwrap_or_else(|| id.clone());
                }
                let mut ctx = ctx.lock().await;
                let codec = ctx
                    .clients
                    .get_mut(&id)
                    .unwrap_or_else(|| panic!("client id '{}' not exists", id));
                codec.encode(&packet).await.unwrap();
            }
            Step::Receive { packet, after } => {
                let id = id.expect("expect id");
                if let Some(after) = after {
                    tokio::time::sleep(Duration::from_secs(after)).await;
                }
                let mut ctx = ctx.lock().await;
                let codec = ctx
                    .clients
                    .get_mut(&id)
                    .unwrap_or_else(|| panic!("client id '{}' not exists", id));
                let (recv_packet, _) = tokio::time::timeout(Duration::from_secs(2), codec.decode())
                    .await
                    .expect("receive packet")
                    .unwrap()
                    .expect("unexpected eof");
                assert_eq!(packet, recv_packet);
            }
            Step::Eof => {
                let id = id.expect("expect id");
                let mut ctx = ctx.lock().await;
                let codec = ctx
                    .clients
                    .get_mut(&id)
                    .unwrap_or_else(|| panic!("client id '{}' not exists", id));
                let res = tokio::time::timeout(Duration::from_secs(2), codec.decode())
                    .await
                    .unwrap();
                if !matches!(res, Ok(None)) {
                    panic!("connection is still not closed.")
                }
            }
            Step::Delay { duration } => tokio::time::sleep(Duration::from_secs(duration)).await,
            Step::Parallel { steps } => {
                let mut futs = Vec::new();
                for step in steps {
                    futs.push(execute_step(ctx.clone(), step, id.clone(), client_id.clone()));
                }
                futures_util::future::join_all(futs).await;
            }
            Step::Sequence {
                id: new_id,
                client_id: new_client_id,
                steps,
            } => {
                let id = id.or(new_id);
                let client_id = client_id.or(new_client_id);
                for step in steps {
                    execute_step(ctx.clone(), step, id.clone(), client_id.clone()).await;
                }
            }
        }
    };
    Box::pin(fut)
}
