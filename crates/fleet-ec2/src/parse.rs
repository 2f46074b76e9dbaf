//! JSON responses from `aws ec2`.

use serde::Deserialize;

use fleet_core::{CloudInstance, FleetError, FleetResult, InstanceState, NAME_TAG, ROLE_TAG, Role};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DescribeInstancesOutput {
    #[serde(default)]
    reservations: Vec<Reservation>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Reservation {
    #[serde(default)]
    instances: Vec<Ec2Instance>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RunInstancesOutput {
    #[serde(default)]
    instances: Vec<Ec2Instance>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Ec2Instance {
    instance_id: String,
    instance_type: String,
    state: Ec2State,
    #[serde(default)]
    tags: Vec<Ec2Tag>,
    #[serde(default)]
    public_dns_name: Option<String>,
    #[serde(default)]
    public_ip_address: Option<String>,
    #[serde(default)]
    private_dns_name: Option<String>,
    #[serde(default)]
    private_ip_address: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Ec2State {
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Ec2Tag {
    key: String,
    value: String,
}

impl Ec2Instance {
    fn tag(&self, key: &str) -> Option<&str> {
        self.tags.iter().find(|t| t.key == key).map(|t| t.value.as_str())
    }

    fn into_snapshot(self) -> FleetResult<CloudInstance> {
        let state = InstanceState::parse(&self.state.name).ok_or_else(|| {
            FleetError::Provider(format!(
                "instance {} reported unknown state '{}'",
                self.instance_id, self.state.name
            ))
        })?;
        let name = self.tag(NAME_TAG).map(str::to_string);
        // Unrecognized role values are treated as untagged.
        let role = self.tag(ROLE_TAG).and_then(Role::parse);

        Ok(CloudInstance {
            id: self.instance_id,
            name,
            role,
            state,
            instance_type: self.instance_type,
            public_address: first_non_empty(self.public_dns_name, self.public_ip_address),
            private_address: first_non_empty(self.private_dns_name, self.private_ip_address),
        })
    }
}

fn first_non_empty(a: Option<String>, b: Option<String>) -> Option<String> {
    a.filter(|s| !s.is_empty()).or(b.filter(|s| !s.is_empty()))
}

fn decode<T: for<'de> Deserialize<'de>>(json: &str, what: &str) -> FleetResult<T> {
    serde_json::from_str(json).map_err(|e| FleetError::Provider(format!("malformed {what} response: {e}")))
}

/// Flatten a `describe-instances` response into snapshots.
pub fn parse_describe_instances(json: &str) -> FleetResult<Vec<CloudInstance>> {
    let output: DescribeInstancesOutput = decode(json, "describe-instances")?;
    output
        .reservations
        .into_iter()
        .flat_map(|r| r.instances)
        .map(Ec2Instance::into_snapshot)
        .collect()
}

/// Snapshots for the instances created by `run-instances`.
pub fn parse_run_instances(json: &str) -> FleetResult<Vec<CloudInstance>> {
    let output: RunInstancesOutput = decode(json, "run-instances")?;
    output.instances.into_iter().map(Ec2Instance::into_snapshot).collect()
}
