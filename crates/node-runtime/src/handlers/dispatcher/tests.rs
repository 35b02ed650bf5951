use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use bc_02_block_log::domain::wire::encode_record;
use bc_02_block_log::{Block, BLOCK_SIZE, INDEX_SIZE};
use bc_03_network::ManagerConfig;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};

use super::*;
use crate::testing::ScriptedConsole;

const WAIT: Duration = Duration::from_secs(5);

struct Node {
    bus: Arc<EventBus>,
    console: Arc<ScriptedConsole>,
    network: Arc<NetworkManager>,
    block_log: Arc<BlockLog>,
    dispatcher: Arc<Dispatcher>,
    runner: JoinHandle<()>,
    _dir: TempDir,
}

impl Node {
    fn start(config: ManagerConfig) -> Self {
        Self::start_in(tempfile::tempdir().unwrap(), config)
    }

    fn start_in(dir: TempDir, config: ManagerConfig) -> Self {
        let bus = Arc::new(EventBus::new());
        let block_log = Arc::new(BlockLog::new(Arc::clone(&bus), chain_path(dir.path())));
        let network = Arc::new(NetworkManager::new(Arc::clone(&bus), config));
        let console = ScriptedConsole::new(Arc::clone(&bus));
        let dispatcher = Dispatcher::new(
            Arc::clone(&bus),
            Arc::clone(&console) as Arc<dyn Channel>,
            Arc::clone(&network),
            Arc::clone(&block_log),
        );
        dispatcher.attach();
        bus.open();
        let runner = {
            let bus = Arc::clone(&bus);
            tokio::spawn(async move { bus.run(2).await })
        };
        Self {
            bus,
            console,
            network,
            block_log,
            dispatcher,
            runner,
            _dir: dir,
        }
    }

    async fn ready(&self) {
        assert!(
            self.console.wait_for(EMAIL_PROMPT, 1, WAIT).await,
            "no email prompt, output: {:?}",
            self.console.output()
        );
    }

    fn addr(&self) -> SocketAddr {
        let port = self.network.listening_port().expect("network not listening");
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    async fn stopped(mut self) -> Self {
        self.bus.close();
        timeout(WAIT, &mut self.runner)
            .await
            .expect("bus did not drain")
            .unwrap();
        self
    }
}

fn chain_path(dir: &Path) -> std::path::PathBuf {
    dir.join("node.blockchain")
}

async fn eventually(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + WAIT;
    while !condition() {
        assert!(tokio::time::Instant::now() < deadline, "timed out waiting for {what}");
        sleep(Duration::from_millis(10)).await;
    }
}

async fn read_frame(stream: &mut TcpStream, size: usize) -> Vec<u8> {
    let mut frame = vec![0; size];
    timeout(WAIT, stream.read_exact(&mut frame))
        .await
        .expect("peer sent nothing")
        .unwrap();
    frame
}

#[test]
fn test_input_limits() {
    assert!(!is_valid_input("", KEY_SIZE));
    assert!(is_valid_input("a", KEY_SIZE));
    assert!(is_valid_input(&"a".repeat(KEY_SIZE), KEY_SIZE));
    assert!(!is_valid_input(&"a".repeat(KEY_SIZE + 1), KEY_SIZE));
    assert!(is_valid_input(&"m".repeat(VALUE_SIZE), VALUE_SIZE));
    assert!(!is_valid_input(&"m".repeat(VALUE_SIZE + 1), VALUE_SIZE));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_startup_prints_port_then_prompts() {
    let node = Node::start(ManagerConfig::loopback());
    node.ready().await;

    assert!(node.block_log.is_open());
    assert!(node.network.is_open());
    let port = node.network.listening_port().unwrap();
    let output = node.console.output();
    assert!(output.starts_with(&format!("Listening on {port}\n")));
    assert!(output.ends_with(EMAIL_PROMPT));
    node.stopped().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_message_is_stored_announced_and_prompted_again() {
    let node = Node::start(ManagerConfig::loopback());
    node.ready().await;

    node.console.type_line("alice@example.org");
    assert!(node.console.wait_for(MESSAGE_PROMPT, 1, WAIT).await);
    node.console.type_line("hello");
    assert!(node.console.wait_for(MESSAGE_PROMPT, 2, WAIT).await);

    assert_eq!(node.block_log.head_index(), 1);
    assert_eq!(node.block_log.head_key().await.unwrap(), "alice@example.org");
    assert_eq!(node.block_log.head_value().await.unwrap(), "hello");

    let output = node.console.output();
    let erase = "\u{8}".repeat(MESSAGE_PROMPT.len());
    assert!(output.contains(&erase));
    assert!(output.contains(" alice@example.org>hello\n"));
    assert_eq!(node.dispatcher.email(), "alice@example.org");
    node.stopped().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_invalid_email_is_asked_again() {
    let node = Node::start(ManagerConfig::loopback());
    node.ready().await;

    node.console.type_line("");
    node.console.type_line(&"x".repeat(KEY_SIZE + 1));
    assert!(node.console.wait_for(EMAIL_PROMPT, 3, WAIT).await);
    assert_eq!(node.console.count(MESSAGE_PROMPT), 0);

    node.console.type_line("bob@example.org");
    assert!(node.console.wait_for(MESSAGE_PROMPT, 1, WAIT).await);
    node.stopped().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_invalid_message_is_asked_again_without_storing() {
    let node = Node::start(ManagerConfig::loopback());
    node.ready().await;

    node.console.type_line("carol@example.org");
    node.console.type_line(&"m".repeat(VALUE_SIZE + 1));
    node.console.type_line("");
    assert!(node.console.wait_for(MESSAGE_PROMPT, 3, WAIT).await);
    assert_eq!(node.block_log.head_index(), 0);
    node.stopped().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_end_of_input_shuts_the_node_down() {
    let node = Node::start(ManagerConfig::loopback());
    node.ready().await;

    node.console.end_input();
    let mut node = node;
    timeout(WAIT, &mut node.runner)
        .await
        .expect("bus did not stop after end of input")
        .unwrap();

    assert!(!node.console.is_open());
    assert!(!node.network.is_open());
    assert!(!node.block_log.is_open());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_close_cascades_through_every_component() {
    let node = Node::start(ManagerConfig::loopback());
    node.ready().await;
    let mut peer = TcpStream::connect(node.addr()).await.unwrap();
    eventually("inbound peer", || node.network.inbound().len() == 1).await;

    let node = node.stopped().await;
    assert!(!node.console.is_open());
    assert!(!node.network.is_open());
    assert!(!node.block_log.is_open());
    assert_eq!(node.bus.subscribers_count(&ON_OPEN), 0);
    assert_eq!(node.bus.subscribers_count(&ON_CLOSE), 0);
    assert_eq!(node.bus.subscribers_count(&ON_SAVE), 0);

    let mut rest = Vec::new();
    let hung_up = timeout(WAIT, peer.read_to_end(&mut rest)).await;
    assert!(hung_up.is_ok(), "peer connection left open");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_existing_head_is_replayed_on_startup() {
    let dir = tempfile::tempdir().unwrap();
    {
        let bus = Arc::new(EventBus::new());
        let log = BlockLog::new(bus, chain_path(dir.path()));
        log.open().await.unwrap();
        log.store("dave@example.org", "still here").await.unwrap();
        log.close().await;
    }

    let node = Node::start_in(dir, ManagerConfig::loopback());
    node.ready().await;
    assert_eq!(node.block_log.head_index(), 1);
    assert!(node
        .console
        .output()
        .contains(" dave@example.org>still here\n"));
    node.stopped().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_fresh_log_announces_nothing() {
    let node = Node::start(ManagerConfig::loopback());
    node.ready().await;
    assert!(!node.console.output().contains('>'));
    node.stopped().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_inbound_peer_is_asked_for_its_head_once() {
    let node = Node::start(ManagerConfig::loopback());
    node.ready().await;

    let mut peer = TcpStream::connect(node.addr()).await.unwrap();
    let request = read_frame(&mut peer, 1 + INDEX_SIZE).await;
    assert_eq!(request, BlockLog::make_block_request(0));

    let mut extra = [0u8; 1];
    let more = timeout(Duration::from_millis(200), peer.read(&mut extra)).await;
    assert!(more.is_err(), "a second request was sent");
    node.stopped().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_local_message_is_pushed_to_inbound_peers() {
    let node = Node::start(ManagerConfig::loopback());
    node.ready().await;
    let mut peer = TcpStream::connect(node.addr()).await.unwrap();
    read_frame(&mut peer, 1 + INDEX_SIZE).await;

    node.console.type_line("erin@example.org");
    node.console.type_line("broadcast");
    let push = read_frame(&mut peer, 1 + BLOCK_SIZE).await;

    assert_eq!(push[0], Opcode::NewBlock.as_byte());
    let block = Block::decode(&push[1..]).unwrap();
    assert_eq!(block.index, 1);
    assert_eq!(block.key_str(), "erin@example.org");
    assert_eq!(block.value_str(), "broadcast");
    node.stopped().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_push_from_inbound_peer_is_saved_without_prompting() {
    let node = Node::start(ManagerConfig::loopback());
    node.ready().await;
    let mut peer = TcpStream::connect(node.addr()).await.unwrap();
    read_frame(&mut peer, 1 + INDEX_SIZE).await;

    let block = Block::genesis()
        .successor(b"frank@example.org", b"from afar", 1_700_000_000_000)
        .unwrap();
    let mut frame = vec![b'x'];
    frame.extend(encode_record(Opcode::Response, &block));
    frame.extend(encode_record(Opcode::NewBlock, &block));
    peer.write_all(&frame).await.unwrap();

    eventually("pushed block saved", || node.block_log.head_index() == 1).await;
    assert!(node
        .console
        .wait_for(" frank@example.org>from afar\n", 1, WAIT)
        .await);
    assert_eq!(node.console.count(MESSAGE_PROMPT), 0);
    assert_eq!(node.block_log.head_block().await.unwrap(), block);
    node.stopped().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_outbound_peer_requests_are_answered() {
    let server = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let config = ManagerConfig::loopback().with_outbound(server.local_addr().unwrap());
    let node = Node::start(config);
    let (mut stream, _) = timeout(WAIT, server.accept()).await.unwrap().unwrap();
    node.ready().await;

    let mut frame = vec![b'?'];
    frame.extend(BlockLog::make_block_request(0));
    stream.write_all(&frame).await.unwrap();

    let response = read_frame(&mut stream, 1 + BLOCK_SIZE).await;
    assert_eq!(response[0], Opcode::Response.as_byte());
    assert!(Block::decode(&response[1..]).unwrap().is_genesis());

    // Past the head: nothing comes back, the connection stays usable.
    stream.write_all(&BlockLog::make_block_request(9)).await.unwrap();
    stream.write_all(&BlockLog::make_block_request(0)).await.unwrap();
    let response = read_frame(&mut stream, 1 + BLOCK_SIZE).await;
    assert_eq!(response[0], Opcode::Response.as_byte());
    node.stopped().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_push_from_outbound_peer_is_saved() {
    let server = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let config = ManagerConfig::loopback().with_outbound(server.local_addr().unwrap());
    let node = Node::start(config);
    let (mut stream, _) = timeout(WAIT, server.accept()).await.unwrap().unwrap();
    node.ready().await;

    let block = Block::genesis()
        .successor(b"grace@example.org", b"hi there", 1_700_000_000_000)
        .unwrap();
    stream
        .write_all(&encode_record(Opcode::NewBlock, &block))
        .await
        .unwrap();

    eventually("pushed block saved", || node.block_log.head_index() == 1).await;
    assert_eq!(node.block_log.head_key().await.unwrap(), "grace@example.org");
    node.stopped().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_lost_outbound_peer_is_redialed() {
    let server = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let config = ManagerConfig::loopback()
        .with_outbound(server.local_addr().unwrap())
        .with_reconnect_interval(Duration::from_millis(50));
    let node = Node::start(config);
    let (first, _) = timeout(WAIT, server.accept()).await.unwrap().unwrap();
    node.ready().await;

    drop(first);
    let second = timeout(WAIT, server.accept()).await;
    assert!(second.is_ok(), "outbound peer was not redialed");
    node.stopped().await;
}
