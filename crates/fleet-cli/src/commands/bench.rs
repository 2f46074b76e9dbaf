use fleet_bench::{BenchmarkDriver, BenchmarkOutcome, BenchmarkRequest};
use fleet_core::FleetConfig;
use fleet_ec2::AwsCli;
use fleet_provision::Fleet;
use fleet_ssh::SshExecutor;

pub async fn exec(config: &FleetConfig, request: &BenchmarkRequest) -> anyhow::Result<()> {
    let provider = AwsCli::from_config(&config.ec2);
    let remote = SshExecutor::from_config(&config.ec2);
    let fleet = Fleet::new(config, &provider, &remote);

    let outcome = BenchmarkDriver::new(&fleet).exec_benchmark(request).await?;
    report(&outcome);
    Ok(())
}

pub async fn suite(config: &FleetConfig, projects: &[String]) -> anyhow::Result<()> {
    let provider = AwsCli::from_config(&config.ec2);
    let remote = SshExecutor::from_config(&config.ec2);
    let fleet = Fleet::new(config, &provider, &remote);

    for outcome in BenchmarkDriver::new(&fleet).benchmark_suite(projects).await? {
        report(&outcome);
    }
    Ok(())
}

pub async fn write_conf(config: &FleetConfig, project: &str, removals: &[String]) -> anyhow::Result<()> {
    let provider = AwsCli::from_config(&config.ec2);
    let remote = SshExecutor::from_config(&config.ec2);
    let fleet = Fleet::new(config, &provider, &remote);

    BenchmarkDriver::new(&fleet).write_conf(project, removals).await?;
    println!("✓ Wrote configuration for {project}");
    Ok(())
}

fn report(outcome: &BenchmarkOutcome) {
    println!("── {} ──", outcome.project);
    println!("  Hosts:   {}", outcome.placement.hosts_arg());
    println!("  Clients: {}", outcome.placement.clients_arg());
    if let Some(trace) = &outcome.trace_artifact {
        println!("  Trace:   {}", trace.display());
    }
    println!("{}", outcome.output.trim_end());
}
