//! Flattens a tagged plan tree into a deduplicated shopping list.
use crate::core::plan::{AcquisitionMethod, NodeId, PlanNode, PlanTree};
use serde::Serialize;
use std::collections::HashMap;

/// One tree occurrence that contributed to an aggregate.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MaterialSource {
    /// Name of the immediate parent, `None` for a top-level target.
    pub parent_name: Option<String>,
    pub quantity: u32,
    /// The occurrence was reached through a Craft-tagged parent.
    pub is_intermediate: bool,
}

/// Deduplicated shopping-list entry for one item id.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MaterialAggregate {
    pub item_id: u32,
    pub name: String,
    pub icon_id: u32,
    pub total_quantity: u32,
    pub unit_price: f64,
    pub requires_hq: bool,
    /// Every contributing occurrence is tagged for a vendor purchase.
    pub vendor_only: bool,
    pub sources: Vec<MaterialSource>,
}

impl MaterialAggregate {
    pub fn total_cost(&self) -> f64 {
        self.unit_price * f64::from(self.total_quantity)
    }
}

#[derive(Debug, Clone, Default)]
pub struct Aggregation {
    pub materials: Vec<MaterialAggregate>,
    /// Items bought with an alternate currency; shown but never summed into totals.
    pub alternate_currency: Vec<MaterialAggregate>,
}

impl Aggregation {
    pub fn total_cost(&self) -> f64 {
        self.materials.iter().map(MaterialAggregate::total_cost).sum()
    }
}

/// Aggregates the atomic purchases of a tree, ordered by name.
pub fn aggregate(tree: &PlanTree) -> Vec<MaterialAggregate> {
    aggregate_materials(tree).materials
}

pub fn aggregate_materials(tree: &PlanTree) -> Aggregation {
    let mut materials = HashMap::new();
    let mut alternate_currency = HashMap::new();

    for &root in tree.roots() {
        visit(tree, root, &mut materials, &mut alternate_currency);
    }

    Aggregation {
        materials: into_sorted(materials),
        alternate_currency: into_sorted(alternate_currency),
    }
}

fn visit(
    tree: &PlanTree,
    id: NodeId,
    materials: &mut HashMap<u32, MaterialAggregate>,
    alternate_currency: &mut HashMap<u32, MaterialAggregate>,
) {
    let node = tree.node(id);
    match node.method {
        AcquisitionMethod::VendorAlternateCurrency => add(tree, node, alternate_currency),
        AcquisitionMethod::MarketBuyNq
        | AcquisitionMethod::MarketBuyHq
        | AcquisitionMethod::VendorBuy => add(tree, node, materials),
        AcquisitionMethod::Craft if node.is_leaf() => add(tree, node, materials),
        AcquisitionMethod::Craft => {
            for &child in &node.children {
                visit(tree, child, materials, alternate_currency);
            }
        }
    }
}

fn unit_price(node: &PlanNode) -> f64 {
    match node.method {
        AcquisitionMethod::MarketBuyHq => node.market_price_hq,
        AcquisitionMethod::VendorBuy | AcquisitionMethod::VendorAlternateCurrency => {
            node.vendor_price
        }
        AcquisitionMethod::MarketBuyNq | AcquisitionMethod::Craft => node.market_price_nq,
    }
}

fn add(tree: &PlanTree, node: &PlanNode, into: &mut HashMap<u32, MaterialAggregate>) {
    let parent = node.parent.map(|parent| tree.node(parent));
    let source = MaterialSource {
        parent_name: parent.map(|p| p.name.clone()),
        quantity: node.quantity,
        is_intermediate: parent.is_some_and(|p| p.method == AcquisitionMethod::Craft),
    };
    let is_vendor = node.method == AcquisitionMethod::VendorBuy;

    let entry = into
        .entry(node.item_id)
        .or_insert_with(|| MaterialAggregate {
            item_id: node.item_id,
            name: node.name.clone(),
            icon_id: node.icon_id,
            total_quantity: 0,
            unit_price: 0.0,
            requires_hq: false,
            vendor_only: true,
            sources: Vec::new(),
        });

    entry.total_quantity = entry.total_quantity.saturating_add(node.quantity);
    // A market HQ purchase only makes sense with HQ listings.
    entry.requires_hq |= node.requires_hq || node.method == AcquisitionMethod::MarketBuyHq;
    entry.vendor_only &= is_vendor;
    if entry.unit_price <= 0.0 {
        entry.unit_price = unit_price(node);
    }
    entry.sources.push(source);
}

fn into_sorted(map: HashMap<u32, MaterialAggregate>) -> Vec<MaterialAggregate> {
    let mut list: Vec<_> = map.into_values().collect();
    list.sort_by(|a, b| a.name.cmp(&b.name).then(a.item_id.cmp(&b.item_id)));
    list
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::plan::PlanNode;
    use std::collections::HashSet;

    /// Sword <- 2x Ingot (craft) <- 3x Ore each, plus Sword <- 1x Ore bought directly.
    /// A second root buys Ingot outright.
    fn sample_tree() -> PlanTree {
        let mut tree = PlanTree::new();
        let sword = tree.add_root(PlanNode::new(1, "Sword", 1));
        let ingot = tree.add_child(sword, PlanNode::new(2, "Ingot", 2));
        tree.add_child(ingot, PlanNode::new(3, "Ore", 6).requiring_hq());
        tree.add_child(
            ingot,
            PlanNode::new(4, "Crystal", 2).with_method(AcquisitionMethod::VendorAlternateCurrency),
        );
        tree.add_child(
            sword,
            PlanNode::new(3, "Ore", 1).with_method(AcquisitionMethod::MarketBuyNq),
        );

        let ingot_root = tree.add_root(
            PlanNode::new(2, "Ingot", 5)
                .with_method(AcquisitionMethod::MarketBuyNq)
                .with_prices(40.0, 70.0, 0.0),
        );
        // Internals of a bought node are irrelevant.
        tree.add_child(ingot_root, PlanNode::new(3, "Ore", 15));
        tree
    }

    #[test]
    fn test_aggregate_stops_at_buy_nodes_and_recurses_into_crafts() {
        let tree = sample_tree();
        let aggregation = aggregate_materials(&tree);

        let names: Vec<_> = aggregation
            .materials
            .iter()
            .map(|m| m.name.as_str())
            .collect();
        assert_eq!(names, vec!["Ingot", "Ore"]);

        let ingot = &aggregation.materials[0];
        assert_eq!(ingot.total_quantity, 5);
        assert_eq!(ingot.unit_price, 40.0);
        assert_eq!(ingot.total_cost(), 200.0);

        let ore = &aggregation.materials[1];
        assert_eq!(ore.total_quantity, 7);
        assert!(ore.requires_hq);
        assert_eq!(ore.sources.len(), 2);
        assert_eq!(ore.sources[0].parent_name.as_deref(), Some("Ingot"));
        assert!(ore.sources[0].is_intermediate);
        assert_eq!(ore.sources[1].parent_name.as_deref(), Some("Sword"));

        assert_eq!(aggregation.alternate_currency.len(), 1);
        assert_eq!(aggregation.alternate_currency[0].name, "Crystal");
    }

    #[test]
    fn test_aggregate_item_set_matches_atomic_nodes() {
        let tree = sample_tree();
        let materials = aggregate(&tree);

        // Collect the atomic occurrences independently of the engine.
        let mut expected_ids = HashSet::new();
        let mut expected_sum: HashMap<u32, u32> = HashMap::new();
        let mut stack: Vec<_> = tree.roots().to_vec();
        while let Some(id) = stack.pop() {
            let node = tree.node(id);
            match node.method {
                AcquisitionMethod::VendorAlternateCurrency => {}
                AcquisitionMethod::Craft if !node.is_leaf() => stack.extend(&node.children),
                _ => {
                    expected_ids.insert(node.item_id);
                    *expected_sum.entry(node.item_id).or_default() += node.quantity;
                }
            }
        }

        let ids: HashSet<_> = materials.iter().map(|m| m.item_id).collect();
        assert_eq!(ids, expected_ids);
        for material in &materials {
            assert_eq!(material.total_quantity, expected_sum[&material.item_id]);
        }
    }

    #[test]
    fn test_hq_purchase_requires_hq_listings() {
        let mut tree = PlanTree::new();
        tree.add_root(
            PlanNode::new(5, "Cotton Yarn", 3)
                .with_method(AcquisitionMethod::MarketBuyHq)
                .with_prices(20.0, 45.0, 0.0),
        );
        let materials = aggregate(&tree);

        assert!(materials[0].requires_hq);
        assert_eq!(materials[0].unit_price, 45.0);
    }

    #[test]
    fn test_root_occurrence_has_no_parent() {
        let mut tree = PlanTree::new();
        tree.add_root(
            PlanNode::new(9, "Fire Shard", 30)
                .with_method(AcquisitionMethod::VendorBuy)
                .with_prices(0.0, 0.0, 4.0),
        );
        let materials = aggregate(&tree);

        assert_eq!(materials.len(), 1);
        assert!(materials[0].vendor_only);
        assert_eq!(materials[0].unit_price, 4.0);
        assert_eq!(materials[0].sources[0].parent_name, None);
        assert!(!materials[0].sources[0].is_intermediate);
    }
}
