use fleet_core::FleetConfig;
use fleet_ec2::AwsCli;
use fleet_provision::Fleet;
use fleet_ssh::SshExecutor;

pub async fn start(config: &FleetConfig) -> anyhow::Result<()> {
    let provider = AwsCli::from_config(&config.ec2);
    let remote = SshExecutor::from_config(&config.ec2);
    let fleet = Fleet::new(config, &provider, &remote);

    let report = fleet.start_cluster().await?;
    println!(
        "✓ Cluster ready: {} instances ({} started)",
        report.instances.len(),
        report.started.len()
    );
    for (i, inst) in report.instances.iter().enumerate() {
        let role = if i == 0 { "head" } else { "client" };
        println!(
            "  {:<10} {:<7} {}",
            inst.label(),
            role,
            inst.public_host().unwrap_or("-")
        );
    }
    Ok(())
}

pub async fn stop(config: &FleetConfig, terminate: bool) -> anyhow::Result<()> {
    let provider = AwsCli::from_config(&config.ec2);
    let remote = SshExecutor::from_config(&config.ec2);
    let fleet = Fleet::new(config, &provider, &remote);

    let count = fleet.stop_cluster(terminate).await?;
    let verb = if terminate { "Terminated" } else { "Stopped" };
    println!("✓ {verb} {count} instances");
    Ok(())
}

pub async fn get_env(config: &FleetConfig) -> anyhow::Result<()> {
    let provider = AwsCli::from_config(&config.ec2);
    let remote = SshExecutor::from_config(&config.ec2);
    let fleet = Fleet::new(config, &provider, &remote);

    for (host, output) in fleet.get_env().await? {
        println!("{host}: {output}");
    }
    Ok(())
}
