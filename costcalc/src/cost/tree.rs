use std::collections::BTreeMap;

use super::{model::CostWithChildren, workloads::Stat};

/// Groups stats into a tree, one level per label in `labels`.
///
/// A stat without the label of the current level is counted on that level only. Every node's
/// cost is the sum of all stats below it.
pub fn build_tree(stats: &[Stat], labels: &[&str]) -> CostWithChildren {
    let refs: Vec<&Stat> = stats.iter().collect();
    group(&refs, labels)
}

fn group(stats: &[&Stat], labels: &[&str]) -> CostWithChildren {
    let mut node = CostWithChildren::default();
    for &stat in stats {
        node.cost += stat.cost;
    }

    let Some((label, rest)) = labels.split_first() else {
        return node;
    };

    let mut groups: BTreeMap<&str, Vec<&Stat>> = BTreeMap::new();
    for &stat in stats {
        if let Some(value) = stat.label(label) {
            groups.entry(value).or_default().push(stat);
        }
    }
    node.children = groups
        .into_iter()
        .map(|(value, members)| (value.to_string(), group(&members, rest)))
        .collect();
    node
}
