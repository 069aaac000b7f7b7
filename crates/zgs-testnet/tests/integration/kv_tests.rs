//! Key-value streams on top of the storage network.

use std::collections::BTreeMap;

use zgs_testnet::{NetworkParams, Scenario, TestNetwork, check_eq};

use crate::helpers::run_passing;

struct KvWriteRead;

impl Scenario for KvWriteRead {
    fn name(&self) -> &str {
        "kv-write-read"
    }

    fn params(&self) -> NetworkParams {
        NetworkParams::nodes(1, 1)
    }

    async fn run(&self, network: &mut TestNetwork) -> color_eyre::Result<()> {
        let stream_id = format!("0x{}", hex::encode(network.random_bytes(32)));
        network.setup_kv_node(0, vec![stream_id.clone()], None).await?;

        let tx = network.tx_params()?;
        let route = network.node_route(0)?;
        let keys = ["alpha", "beta", "gamma"];
        let values = ["1", "22", "333"];
        network
            .cli()
            .kv_write(&tx, &route, &stream_id, &keys, &values)
            .await?;

        let kv_url = network.kv_nodes()[0].rpc_url();
        let expected: BTreeMap<String, String> = keys
            .iter()
            .zip(values)
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();

        let cli = network.cli();
        let (url, stream, wanted) = (kv_url.as_str(), stream_id.as_str(), &expected);
        let read = network
            .config()
            .probe()
            .wait_for("kv replay", move || async move {
                let read = cli.kv_read(url, stream, &keys).await?;
                Ok((read == *wanted).then_some(read))
            })
            .await?;
        check_eq!(read, expected);

        // a restarted kv node replays the stream from its database
        network.stop_kv_node(0)?;
        network.start_kv_node(0)?;
        let cli = network.cli();
        network
            .config()
            .probe()
            .wait_until("kv replay after restart", move || async move {
                Ok(cli.kv_read(url, stream, &keys).await? == *wanted)
            })
            .await?;
        Ok(())
    }
}

#[tokio::test]
async fn test_kv_write_then_read() -> color_eyre::Result<()> {
    run_passing(31300, &KvWriteRead).await
}
