//! Topic subscription index.
//!
//! Derived on demand from instance records; never stored. A service appears
//! once per topic no matter how many of its instances subscribe.

use std::collections::{BTreeMap, BTreeSet};

use crate::registry::instance::ServiceInstance;

/// Build `topic -> subscribing service names` over the given instances.
///
/// Topics and service names come back sorted.
pub fn build_topic_map<'a, I>(instances: I) -> BTreeMap<String, Vec<String>>
where
    I: IntoIterator<Item = &'a ServiceInstance>,
{
    let mut index: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for instance in instances {
        for topic in &instance.topics {
            index
                .entry(topic.clone())
                .or_default()
                .insert(instance.service_name.clone());
        }
    }

    index
        .into_iter()
        .map(|(topic, services)| (topic, services.into_iter().collect()))
        .collect()
}

/// Service names subscribed to a single topic.
pub fn subscribers_of<'a, I>(instances: I, topic: &str) -> Vec<String>
where
    I: IntoIterator<Item = &'a ServiceInstance>,
{
    let services: BTreeSet<String> = instances
        .into_iter()
        .filter(|instance| instance.topics.iter().any(|t| t == topic))
        .map(|instance| instance.service_name.clone())
        .collect();
    services.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instance(service: &str, id: &str, topics: &[&str]) -> ServiceInstance {
        ServiceInstance::new(service, id, "localhost", 8080)
            .with_topics(topics.iter().map(|t| t.to_string()).collect())
    }

    #[test]
    fn test_topic_map_groups_services() {
        let instances = vec![
            instance("billing-service", "billing-1", &["order.created", "payment.failed"]),
            instance("notification-service", "n-1", &["order.created", "user.registered"]),
        ];

        let map = build_topic_map(&instances);
        assert_eq!(map.len(), 3);
        assert_eq!(
            map["order.created"],
            vec!["billing-service".to_string(), "notification-service".to_string()]
        );
        assert_eq!(map["payment.failed"], vec!["billing-service".to_string()]);
        assert_eq!(map["user.registered"], vec!["notification-service".to_string()]);
    }

    #[test]
    fn test_multiple_instances_counted_once() {
        let instances: Vec<_> = (0..3)
            .map(|i| instance("billing-service", &format!("billing-{}", i), &["order.created"]))
            .collect();

        assert_eq!(subscribers_of(&instances, "order.created"), vec!["billing-service"]);
        assert_eq!(build_topic_map(&instances)["order.created"].len(), 1);
    }

    #[test]
    fn test_instances_without_topics_are_invisible() {
        let instances = vec![instance("simple-service", "s-1", &[])];
        assert!(build_topic_map(&instances).is_empty());
        assert!(subscribers_of(&instances, "order.created").is_empty());
    }
}
