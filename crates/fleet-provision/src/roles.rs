//! Head selection and ordering.

use fleet_core::{CloudInstance, Role};

/// The instance holding the head role.
///
/// A running head wins over a stopped one; otherwise the first
/// head-tagged instance in listing order. List position alone never
/// makes an instance the head.
pub fn find_head(instances: &[CloudInstance]) -> Option<&CloudInstance> {
    instances
        .iter()
        .find(|i| i.is_head() && i.is_running())
        .or_else(|| instances.iter().find(|i| i.is_head()))
}

/// Move the head to the front, keeping everyone else in order.
pub fn order_head_first(mut running: Vec<CloudInstance>, head_id: &str) -> Vec<CloudInstance> {
    if let Some(pos) = running.iter().position(|i| i.id == head_id) {
        let head = running.remove(pos);
        running.insert(0, head);
    }
    running
}

/// Role each running instance plays once the head is known.
pub fn assign_roles(running: &[CloudInstance], head_id: &str) -> Vec<(String, Role)> {
    running
        .iter()
        .map(|i| {
            let role = if i.id == head_id { Role::Head } else { Role::Client };
            (i.id.clone(), role)
        })
        .collect()
}
