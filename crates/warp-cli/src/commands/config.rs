use warpgrid_bridge::BridgeConfig;

pub fn print(config: &BridgeConfig) -> anyhow::Result<()> {
    print!("{}", config.to_toml_string()?);
    Ok(())
}
