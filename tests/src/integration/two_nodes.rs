//! # Two-Node Flows
//!
//! Node B dials node A. A asks every connection it accepts for its head and
//! pushes its own new entries down those connections.
//!
//! ```text
//! B (outbound) ──connect──→ A (acceptor)
//! B ←── 'r' index 0 ─────── A
//! B ─── 'b' record ───────→ A   (read and dropped)
//! B ←── 'n' record ──────── A   (on every local store in A)
//! ```

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use bc_01_channel::ports::Channel;
    use bc_02_block_log::INDEX_SIZE;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpStream;
    use tokio::time::timeout;

    use crate::integration::harness::{eventually, TestNode, WAIT};

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_acceptor_message_reaches_dialer() {
        let a = TestNode::start("alpha", None).await;
        let b = TestNode::start("beta", Some(a.addr())).await;
        eventually("A accepted B", || a.app.network().inbound().len() == 1).await;
        eventually("B connected", || b.app.network().outbound().is_open()).await;

        a.login("alice@alpha.org").await;
        a.say("hello beta").await;

        eventually("B saved the push", || b.app.block_log().head_index() == 1).await;
        assert_eq!(b.app.block_log().head_key().await.unwrap(), "alice@alpha.org");
        assert_eq!(b.app.block_log().head_value().await.unwrap(), "hello beta");
        assert!(b.console.wait_for(" alice@alpha.org>hello beta\n", 1, WAIT).await);
        assert_eq!(
            b.app.block_log().head_hash().await.unwrap(),
            a.app.block_log().head_hash().await.unwrap()
        );

        b.stop().await;
        a.stop().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_pushed_chain_keeps_its_links() {
        let a = TestNode::start("gamma", None).await;
        let b = TestNode::start("delta", Some(a.addr())).await;
        eventually("A accepted B", || a.app.network().inbound().len() == 1).await;

        a.login("carol@gamma.org").await;
        a.say("first").await;
        a.say("second").await;
        eventually("B saved both", || b.app.block_log().head_index() == 2).await;

        let log = b.app.block_log();
        let first = log.block_at(1).await.unwrap();
        let second = log.block_at(2).await.unwrap();
        assert_eq!(second.previous_hash, first.hash());
        assert_eq!(first, a.app.block_log().block_at(1).await.unwrap());

        b.stop().await;
        a.stop().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_dialer_messages_stay_local() {
        let a = TestNode::start("epsilon", None).await;
        let b = TestNode::start("zeta", Some(a.addr())).await;
        eventually("A accepted B", || a.app.network().inbound().len() == 1).await;

        b.login("bob@zeta.org").await;
        b.say("only here").await;
        assert_eq!(b.app.block_log().head_index(), 1);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(a.app.block_log().head_index(), 0);

        b.stop().await;
        a.stop().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_each_accepted_connection_gets_exactly_one_request() {
        let a = TestNode::start("eta", None).await;

        let mut peers = Vec::new();
        for _ in 0..2 {
            peers.push(TcpStream::connect(a.addr()).await.unwrap());
        }
        for peer in &mut peers {
            let mut request = [0u8; 1 + INDEX_SIZE];
            timeout(WAIT, peer.read_exact(&mut request))
                .await
                .expect("no request from the acceptor")
                .unwrap();
            assert_eq!(request[0], b'r');
            assert_eq!(&request[1..], &0u64.to_le_bytes());
        }
        for peer in &mut peers {
            let mut extra = [0u8; 1];
            let more = timeout(Duration::from_millis(200), peer.read(&mut extra)).await;
            assert!(more.is_err(), "acceptor sent more than one request");
        }

        a.stop().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_late_dialer_takes_pushes_at_their_own_index() {
        let a = TestNode::start("theta", None).await;
        a.login("dan@theta.org").await;
        a.say("old news").await;

        let b = TestNode::start("iota", Some(a.addr())).await;
        eventually("A accepted B", || a.app.network().inbound().len() == 1).await;
        a.say("new news").await;

        // B never saw block 1 but still takes block 2 as its head.
        eventually("B saved the push", || b.app.block_log().head_index() == 2).await;
        assert_eq!(b.app.block_log().head_value().await.unwrap(), "new news");

        b.stop().await;
        a.stop().await;
    }
}
