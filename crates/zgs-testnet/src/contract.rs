//! On-chain contracts the storage network is wired to.

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::info;

use crate::error::{HarnessError, Result};
use crate::probe::ReadinessProbe;
use crate::rpc::{RpcClient, parse_quantity};

const DEPLOY_GAS: u64 = 30_000_000;

/// The contracts deployed for every run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContractKind {
    /// Accepts data submissions; storage and kv nodes follow its log.
    Flow,
    Mine,
    Reward,
}

impl ContractKind {
    pub const ALL: [ContractKind; 3] = [Self::Flow, Self::Mine, Self::Reward];

    /// File stem of the compiled artifact under the contract directory.
    pub fn artifact_name(&self) -> &'static str {
        match self {
            Self::Flow => "Flow",
            Self::Mine => "PoraMine",
            Self::Reward => "ChunkLinearReward",
        }
    }
}

impl fmt::Display for ContractKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.artifact_name())
    }
}

/// Address handle for a deployed contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractProxy {
    kind: ContractKind,
    address: String,
}

impl ContractProxy {
    pub fn new(kind: ContractKind, address: impl Into<String>) -> Self {
        Self {
            kind,
            address: address.into(),
        }
    }

    pub fn kind(&self) -> ContractKind {
        self.kind
    }

    /// `0x`-prefixed contract address.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// True if `rpc`'s node has code at this address.
    pub async fn is_deployed(&self, rpc: &RpcClient) -> Result<bool> {
        let code: String = rpc
            .call("eth_getCode", json!([self.address, "latest"]))
            .await?;
        Ok(code.len() > 2)
    }
}

/// Result of deploying the contract set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Deployment {
    pub flow: ContractProxy,
    pub mine: ContractProxy,
    pub reward: ContractProxy,
    /// Transaction that created the flow contract; other chain nodes must
    /// see it before storage nodes start.
    pub tx_hash: String,
    /// Block the flow contract was confirmed in.
    pub block: u64,
}

impl Deployment {
    pub fn get(&self, kind: ContractKind) -> &ContractProxy {
        match kind {
            ContractKind::Flow => &self.flow,
            ContractKind::Mine => &self.mine,
            ContractKind::Reward => &self.reward,
        }
    }
}

/// Read the creation bytecode from `<dir>/<Name>.json`.
///
/// Accepts both `"bytecode": "0x.."` and `"bytecode": {"object": "0x.."}`.
pub fn load_bytecode(dir: &Path, kind: ContractKind) -> Result<String> {
    let path = dir.join(format!("{}.json", kind.artifact_name()));
    let artifact: Value = serde_json::from_slice(&std::fs::read(&path).map_err(|e| {
        HarnessError::Config(format!("cannot read artifact {}: {e}", path.display()))
    })?)?;

    let code = match &artifact["bytecode"] {
        Value::String(code) => code.as_str(),
        Value::Object(obj) => obj.get("object").and_then(Value::as_str).unwrap_or_default(),
        _ => "",
    };
    if code.is_empty() || code == "0x" {
        return Err(HarnessError::Config(format!(
            "artifact {} has no bytecode",
            path.display()
        )));
    }
    Ok(if code.starts_with("0x") {
        code.to_string()
    } else {
        format!("0x{code}")
    })
}

struct Deployed {
    address: String,
    tx_hash: String,
    block: u64,
}

/// Deploy every [`ContractKind`] from the node's first unlocked account and
/// wait for each receipt.
pub async fn deploy_contracts(
    rpc: &RpcClient,
    contract_dir: &Path,
    probe: &ReadinessProbe,
) -> Result<Deployment> {
    let accounts: Vec<String> = rpc.call("eth_accounts", json!([])).await?;
    let from = accounts.into_iter().next().ok_or_else(|| HarnessError::Rpc {
        url: rpc.url().to_string(),
        method: "eth_accounts".to_string(),
        message: "node has no unlocked account to deploy from".to_string(),
    })?;

    let flow = deploy_one(rpc, &from, contract_dir, ContractKind::Flow, probe).await?;
    let mine = deploy_one(rpc, &from, contract_dir, ContractKind::Mine, probe).await?;
    let reward = deploy_one(rpc, &from, contract_dir, ContractKind::Reward, probe).await?;

    Ok(Deployment {
        flow: ContractProxy::new(ContractKind::Flow, flow.address),
        mine: ContractProxy::new(ContractKind::Mine, mine.address),
        reward: ContractProxy::new(ContractKind::Reward, reward.address),
        tx_hash: flow.tx_hash,
        block: flow.block,
    })
}

async fn deploy_one(
    rpc: &RpcClient,
    from: &str,
    contract_dir: &Path,
    kind: ContractKind,
    probe: &ReadinessProbe,
) -> Result<Deployed> {
    let data = load_bytecode(contract_dir, kind)?;
    let tx_hash: String = rpc
        .call(
            "eth_sendTransaction",
            json!([{
                "from": from,
                "data": data,
                "gas": format!("{DEPLOY_GAS:#x}"),
            }]),
        )
        .await?;

    let hash = tx_hash.as_str();
    let receipt = probe
        .wait_for(&format!("{kind} deployment receipt"), move || {
            rpc.transaction_receipt(hash)
        })
        .await?;

    let deployed = parse_receipt(&receipt).map_err(|message| HarnessError::Rpc {
        url: rpc.url().to_string(),
        method: "eth_getTransactionReceipt".to_string(),
        message: format!("{kind}: {message}"),
    })?;
    info!(contract = %kind, address = %deployed.0, block = deployed.1, "contract deployed");

    Ok(Deployed {
        address: deployed.0,
        tx_hash,
        block: deployed.1,
    })
}

/// Contract address and block number of a successful creation receipt.
fn parse_receipt(receipt: &Value) -> std::result::Result<(String, u64), String> {
    if let Some(status) = receipt["status"].as_str() {
        if parse_quantity(status) != Some(1) {
            return Err(format!("deployment reverted (status {status})"));
        }
    }
    let address = receipt["contractAddress"]
        .as_str()
        .ok_or("receipt has no contractAddress")?;
    let block = receipt["blockNumber"]
        .as_str()
        .and_then(parse_quantity)
        .ok_or("receipt has no blockNumber")?;
    Ok((address.to_string(), block))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_bytecode_formats() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("Flow.json"), r#"{"abi":[],"bytecode":"0x6080"}"#).unwrap();
        std::fs::write(
            dir.path().join("PoraMine.json"),
            r#"{"abi":[],"bytecode":{"object":"6001"}}"#,
        )
        .unwrap();
        std::fs::write(dir.path().join("ChunkLinearReward.json"), r#"{"bytecode":"0x"}"#).unwrap();

        assert_eq!(load_bytecode(dir.path(), ContractKind::Flow).unwrap(), "0x6080");
        assert_eq!(load_bytecode(dir.path(), ContractKind::Mine).unwrap(), "0x6001");
        assert!(matches!(
            load_bytecode(dir.path(), ContractKind::Reward),
            Err(HarnessError::Config(_))
        ));
    }

    #[test]
    fn test_missing_artifact() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_bytecode(dir.path(), ContractKind::Flow).is_err());
    }

    #[test]
    fn test_parse_receipt() {
        let ok = json!({
            "status": "0x1",
            "contractAddress": "0x5fbdb2315678afecb367f032d93f642f64180aa3",
            "blockNumber": "0x2",
        });
        assert_eq!(
            parse_receipt(&ok).unwrap(),
            ("0x5fbdb2315678afecb367f032d93f642f64180aa3".to_string(), 2)
        );

        let reverted = json!({"status": "0x0", "contractAddress": null, "blockNumber": "0x3"});
        assert!(parse_receipt(&reverted).unwrap_err().contains("reverted"));
    }

    #[test]
    fn test_deployment_lookup() {
        let deployment = Deployment {
            flow: ContractProxy::new(ContractKind::Flow, "0x01"),
            mine: ContractProxy::new(ContractKind::Mine, "0x02"),
            reward: ContractProxy::new(ContractKind::Reward, "0x03"),
            tx_hash: "0xaa".to_string(),
            block: 1,
        };
        for kind in ContractKind::ALL {
            assert_eq!(deployment.get(kind).kind(), kind);
        }
        assert_eq!(deployment.get(ContractKind::Mine).address(), "0x02");
    }
}
