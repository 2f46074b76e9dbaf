use fleet_core::{FleetConfig, Topology};

pub fn plan(config: &FleetConfig, format: &str) -> anyhow::Result<()> {
    let topology = Topology::from_config(config)?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&topology)?);
        }
        _ => {
            println!("Hosts:      {}", topology.host_count);
            println!("Sites:      {}", topology.site_count);
            println!("Partitions: {}", topology.partition_count);
            println!("Clients:    {}", topology.client_count);
            println!("Instances:  {}", topology.required_instances());
        }
    }

    Ok(())
}

pub fn show_config(config: &FleetConfig) -> anyhow::Result<()> {
    print!("{}", config.to_toml_string()?);
    Ok(())
}
