use anyhow::{
    Context,
    Result,
    anyhow,
};
use chrono::Utc;
use serde::{
    Deserialize,
    Serialize,
};
use std::{
    fmt,
    fs,
    io::Write,
    path::{
        Path,
        PathBuf,
    },
    str::FromStr,
};

pub const DEPLOYMENTS_ROOT: &str = ".deployments";
const DEPLOYMENTS_FILE: &str = "deployments.json";

pub const ENV_CHAIN_ID: &str = "LOTTERY_CHAIN_ID";
pub const ENV_RPC_URL: &str = "LOTTERY_RPC_URL";
pub const ENV_LOTTERY_ADDRESS: &str = "LOTTERY_ADDRESS";
pub const ENV_BLOCK_EXPLORER: &str = "LOTTERY_BLOCK_EXPLORER";
pub const ENV_VRF_SUBSCRIPTION: &str = "LOTTERY_VRF_SUBSCRIPTION";
pub const ENV_VRF_KEY_HASH: &str = "LOTTERY_VRF_KEY_HASH";
pub const ENV_SPENDING_APPROVAL_MODE: &str = "LOTTERY_SPENDING_APPROVAL_MODE";
pub const ENV_TOKEN_SALE_ADDRESS: &str = "LOTTERY_ICO_ADDRESS";

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DeploymentEnv {
    Local,
    Testnet,
    Mainnet,
}

impl DeploymentEnv {
    pub fn dir_name(self) -> &'static str {
        match self {
            DeploymentEnv::Local => "local",
            DeploymentEnv::Testnet => "testnet",
            DeploymentEnv::Mainnet => "mainnet",
        }
    }
}

impl fmt::Display for DeploymentEnv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DeploymentEnv::Local => "Local",
            DeploymentEnv::Testnet => "Testnet",
            DeploymentEnv::Mainnet => "Mainnet",
        };
        write!(f, "{name}")
    }
}

impl FromStr for DeploymentEnv {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "local" => Ok(DeploymentEnv::Local),
            "testnet" | "test" => Ok(DeploymentEnv::Testnet),
            "mainnet" | "main" => Ok(DeploymentEnv::Mainnet),
            other => Err(anyhow!(
                "unknown deployment environment `{other}`, expected local, testnet or mainnet"
            )),
        }
    }
}

/// How ticket purchases get permission to move the player's currency tokens.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpendingApprovalMode {
    /// Separate `approve` transaction before buying.
    #[default]
    Manual,
    /// EIP-2612 `permit` signature.
    Eip2612,
    /// DAI-style `permit` signature.
    Dai,
}

impl SpendingApprovalMode {
    /// Unrecognized or missing selectors fall back to `Manual`.
    pub fn sanitize(selector: Option<&str>) -> Self {
        match selector.map(|s| s.trim().to_ascii_lowercase()).as_deref() {
            Some("eip2612") => SpendingApprovalMode::Eip2612,
            Some("dai") => SpendingApprovalMode::Dai,
            _ => SpendingApprovalMode::Manual,
        }
    }
}

impl fmt::Display for SpendingApprovalMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SpendingApprovalMode::Manual => "manual",
            SpendingApprovalMode::Eip2612 => "eip2612",
            SpendingApprovalMode::Dai => "dai",
        };
        write!(f, "{name}")
    }
}

/// Where a lottery deployment lives and how to talk to it. Values are kept
/// as the strings they were configured with; typed parsing happens in the
/// client.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentRecord {
    pub chain_id: u64,
    pub rpc_url: String,
    pub lottery_address: String,
    #[serde(default)]
    pub block_explorer: Option<String>,
    #[serde(default)]
    pub vrf_subscription_id: Option<String>,
    #[serde(default)]
    pub vrf_key_hash: Option<String>,
    #[serde(default)]
    pub spending_approval_mode: Option<String>,
    /// Governance token sale contract, when one is running.
    #[serde(default)]
    pub token_sale_address: Option<String>,
    pub deployed_at: String,
    #[serde(default)]
    pub deployment_block: Option<u64>,
}

impl DeploymentRecord {
    pub fn new(chain_id: u64, rpc_url: impl Into<String>, lottery_address: impl Into<String>) -> Self {
        Self {
            chain_id,
            rpc_url: rpc_url.into(),
            lottery_address: lottery_address.into(),
            block_explorer: None,
            vrf_subscription_id: None,
            vrf_key_hash: None,
            spending_approval_mode: None,
            token_sale_address: None,
            deployed_at: Utc::now().to_rfc3339(),
            deployment_block: None,
        }
    }

    /// Template used when nothing has been recorded for `env` yet. The
    /// lottery address is left empty and must come from an override.
    pub fn template(env: DeploymentEnv) -> Self {
        let (chain_id, rpc_url) = match env {
            DeploymentEnv::Local => (31337, "ws://127.0.0.1:8545"),
            DeploymentEnv::Testnet => (11155111, "wss://ethereum-sepolia-rpc.publicnode.com"),
            DeploymentEnv::Mainnet => (1, "wss://ethereum-rpc.publicnode.com"),
        };
        Self::new(chain_id, rpc_url, "")
    }

    pub fn spending_approval_mode(&self) -> SpendingApprovalMode {
        SpendingApprovalMode::sanitize(self.spending_approval_mode.as_deref())
    }

    /// Replaces fields with the `LOTTERY_*` values returned by `lookup`.
    pub fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<()> {
        let lookup = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());
        if let Some(chain_id) = lookup(ENV_CHAIN_ID) {
            self.chain_id = chain_id
                .trim()
                .parse()
                .with_context(|| format!("{ENV_CHAIN_ID} is not a number: {chain_id}"))?;
        }
        if let Some(rpc_url) = lookup(ENV_RPC_URL) {
            self.rpc_url = rpc_url;
        }
        if let Some(address) = lookup(ENV_LOTTERY_ADDRESS) {
            self.lottery_address = address;
        }
        if let Some(explorer) = lookup(ENV_BLOCK_EXPLORER) {
            self.block_explorer = Some(explorer);
        }
        if let Some(subscription) = lookup(ENV_VRF_SUBSCRIPTION) {
            self.vrf_subscription_id = Some(subscription);
        }
        if let Some(key_hash) = lookup(ENV_VRF_KEY_HASH) {
            self.vrf_key_hash = Some(key_hash);
        }
        if let Some(mode) = lookup(ENV_SPENDING_APPROVAL_MODE) {
            self.spending_approval_mode = Some(mode);
        }
        if let Some(address) = lookup(ENV_TOKEN_SALE_ADDRESS) {
            self.token_sale_address = Some(address);
        }
        Ok(())
    }

    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides(|name| std::env::var(name).ok())
    }
}

#[derive(Debug)]
pub struct DeploymentStore {
    path: PathBuf,
}

impl DeploymentStore {
    pub fn new(env: DeploymentEnv) -> Result<Self> {
        Self::in_root(DEPLOYMENTS_ROOT, env)
    }

    pub fn in_root(root: impl AsRef<Path>, env: DeploymentEnv) -> Result<Self> {
        let path = ensure_store(root.as_ref(), env)?;
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<Option<DeploymentRecord>> {
        read_record(&self.path)
    }

    pub fn save(&self, record: &DeploymentRecord) -> Result<()> {
        write_record(&self.path, record)
    }

    /// The stored record (or the environment's template) with `LOTTERY_*`
    /// overrides from `lookup` applied.
    pub fn resolve(
        &self,
        env: DeploymentEnv,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<DeploymentRecord> {
        let mut record = match self.load()? {
            Some(record) => record,
            None => {
                tracing::debug!("no {env} deployment recorded, using defaults");
                DeploymentRecord::template(env)
            }
        };
        record.apply_overrides(lookup)?;
        Ok(record)
    }
}

/// Loads the configuration for `env` from `.deployments/` and the process
/// environment.
pub fn load_config(env: DeploymentEnv) -> Result<DeploymentRecord> {
    DeploymentStore::new(env)?.resolve(env, |name| std::env::var(name).ok())
}

pub fn record_deployment(env: DeploymentEnv, record: &DeploymentRecord) -> Result<()> {
    let store = DeploymentStore::new(env)?;
    store.save(record)?;
    tracing::info!("recorded {env} deployment at {}", store.path().display());
    Ok(())
}

fn ensure_store(root: &Path, env: DeploymentEnv) -> Result<PathBuf> {
    let env_dir = root.join(env.dir_name());
    if !env_dir.exists() {
        fs::create_dir_all(&env_dir).with_context(|| {
            format!("Failed to create {} directory", env_dir.display())
        })?;
    }

    let file_path = env_dir.join(DEPLOYMENTS_FILE);
    if !file_path.exists() {
        let mut file = fs::File::create(&file_path).with_context(|| {
            format!(
                "Failed to create deployment record file for {} at {:?}",
                env, file_path
            )
        })?;
        file.write_all(b"").with_context(|| {
            format!("Failed to initialize deployment record file for {}", env)
        })?;
    }

    Ok(file_path)
}

fn read_record(path: impl AsRef<Path>) -> Result<Option<DeploymentRecord>> {
    let data = fs::read(path.as_ref()).context("Failed to read deployment records")?;
    if data.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    if let Ok(record) = serde_json::from_slice::<DeploymentRecord>(&data) {
        return Ok(Some(record));
    }
    if let Ok(mut records) = serde_json::from_slice::<Vec<DeploymentRecord>>(&data) {
        return Ok(records.pop());
    }
    Err(anyhow!(
        "Failed to parse deployment record JSON; expected a deployment object or a list of them"
    ))
}

fn write_record(path: impl AsRef<Path>, record: &DeploymentRecord) -> Result<()> {
    let json = serde_json::to_vec_pretty(record)
        .context("Failed to serialize deployment record")?;
    fs::write(path.as_ref(), json).context("Failed to write deployment record")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]

    use super::*;
    use std::collections::HashMap;
    use tempdir::TempDir;

    fn no_overrides(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn in_root__creates_empty_store() {
        // given
        let root = TempDir::new("deployments").unwrap();

        // when
        let store = DeploymentStore::in_root(root.path(), DeploymentEnv::Testnet).unwrap();

        // then
        assert!(store.path().ends_with("testnet/deployments.json"));
        assert_eq!(store.load().unwrap(), None);
    }

    #[test]
    fn save__then_load__returns_record() {
        // given
        let root = TempDir::new("deployments").unwrap();
        let store = DeploymentStore::in_root(root.path(), DeploymentEnv::Local).unwrap();
        let mut record = DeploymentRecord::new(31337, "ws://localhost:8545", "0x10");
        record.vrf_key_hash = Some("0xabc".to_string());

        // when
        store.save(&record).unwrap();

        // then
        assert_eq!(store.load().unwrap(), Some(record));
    }

    #[test]
    fn load__list_of_records__returns_latest() {
        // given
        let root = TempDir::new("deployments").unwrap();
        let store = DeploymentStore::in_root(root.path(), DeploymentEnv::Local).unwrap();
        let first = DeploymentRecord::new(1, "a", "0x01");
        let second = DeploymentRecord::new(2, "b", "0x02");
        fs::write(store.path(), serde_json::to_vec(&[&first, &second]).unwrap()).unwrap();

        // when
        let loaded = store.load().unwrap();

        // then
        assert_eq!(loaded, Some(second));
    }

    #[test]
    fn load__garbage__is_an_error() {
        let root = TempDir::new("deployments").unwrap();
        let store = DeploymentStore::in_root(root.path(), DeploymentEnv::Local).unwrap();
        fs::write(store.path(), b"{ not json").unwrap();
        assert!(store.load().is_err());
    }

    #[test]
    fn resolve__overrides_take_precedence_over_stored_values() {
        // given
        let root = TempDir::new("deployments").unwrap();
        let store = DeploymentStore::in_root(root.path(), DeploymentEnv::Testnet).unwrap();
        store
            .save(&DeploymentRecord::new(5, "wss://stored", "0xstored"))
            .unwrap();
        let vars: HashMap<&str, &str> = [
            (ENV_CHAIN_ID, "11155111"),
            (ENV_LOTTERY_ADDRESS, "0xoverride"),
            (ENV_SPENDING_APPROVAL_MODE, "EIP2612"),
            (ENV_BLOCK_EXPLORER, " "),
            (ENV_TOKEN_SALE_ADDRESS, "0xsale"),
        ]
        .into_iter()
        .collect();

        // when
        let record = store
            .resolve(DeploymentEnv::Testnet, |name| {
                vars.get(name).map(|value| value.to_string())
            })
            .unwrap();

        // then
        assert_eq!(record.chain_id, 11155111);
        assert_eq!(record.rpc_url, "wss://stored");
        assert_eq!(record.lottery_address, "0xoverride");
        assert_eq!(record.block_explorer, None);
        assert_eq!(record.spending_approval_mode(), SpendingApprovalMode::Eip2612);
        assert_eq!(record.token_sale_address.as_deref(), Some("0xsale"));
    }

    #[test]
    fn resolve__nothing_stored__uses_template() {
        let root = TempDir::new("deployments").unwrap();
        let store = DeploymentStore::in_root(root.path(), DeploymentEnv::Local).unwrap();
        let record = store.resolve(DeploymentEnv::Local, no_overrides).unwrap();
        assert_eq!(record.chain_id, 31337);
        assert!(record.lottery_address.is_empty());
    }

    #[test]
    fn apply_overrides__bad_chain_id__is_an_error() {
        let mut record = DeploymentRecord::template(DeploymentEnv::Local);
        let result = record.apply_overrides(|name| {
            (name == ENV_CHAIN_ID).then(|| "sepolia".to_string())
        });
        assert!(result.is_err());
    }

    #[test]
    fn sanitize__unknown_modes_fall_back_to_manual() {
        assert_eq!(
            SpendingApprovalMode::sanitize(Some("dai")),
            SpendingApprovalMode::Dai
        );
        assert_eq!(
            SpendingApprovalMode::sanitize(Some("permit2")),
            SpendingApprovalMode::Manual
        );
        assert_eq!(SpendingApprovalMode::sanitize(None), SpendingApprovalMode::Manual);
    }

    #[test]
    fn deployment_env__parses_names() {
        assert_eq!("Mainnet".parse::<DeploymentEnv>().unwrap(), DeploymentEnv::Mainnet);
        assert_eq!("test".parse::<DeploymentEnv>().unwrap(), DeploymentEnv::Testnet);
        assert!("devnet".parse::<DeploymentEnv>().is_err());
    }
}
