use clap::Parser;

#[derive(Debug, Parser)]
#[command(author, version, about)]
pub struct Args {
    #[arg(long, env = "ORBIT_BRIDGE_ADDR", default_value = "0.0.0.0:8001")]
    pub listen_addr: String,

    /// Key gating every mutating endpoint. Falls back to the pool
    /// config's user_api_key when unset.
    #[arg(long, env = "ACCESS_KEY")]
    pub access_key: Option<String>,

    /// Container runtime backend: `docker` or `host`.
    #[arg(long, default_value = "docker")]
    pub runtime: String,
}
