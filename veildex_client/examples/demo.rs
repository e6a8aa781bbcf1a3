//! End-to-end walkthrough against a running server.
//!
//! Start the server first:
//!
//! ```bash
//! cargo run -p veildex_server --example serve
//! ```
//!
//! then:
//!
//! ```bash
//! cargo run -p veildex_client --example demo -- 127.0.0.1:4000
//! ```

use anyhow::Context;

use veildex_client::{IndexClient, TcpConn, SEED_BYTE_LEN};

fn main() -> anyhow::Result<()> {
    let addr = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "127.0.0.1:4000".to_string());

    let conn = TcpConn::connect(&addr).with_context(|| format!("connecting to {addr}"))?;
    let seed = [42u8; SEED_BYTE_LEN];
    let mut client = IndexClient::new(conn, "demo", &seed, 1024)?;

    for id in 1..=10u64 {
        client.insert("inbox", id)?;
    }
    for id in [2u64, 4, 6, 8, 10] {
        client.insert("urgent", id)?;
    }
    client.delete("inbox", 3)?;
    client.delete("urgent", 10)?;

    println!("inbox            -> {:?}", client.search(&["inbox"])?);
    println!("inbox AND urgent -> {:?}", client.search(&["inbox", "urgent"])?);

    // the second search walks only what changed since the first
    client.insert("inbox", 11)?;
    println!("inbox again      -> {:?}", client.search(&["inbox"])?);

    Ok(())
}
