//! Craft-vs-buy comparison over a priced plan tree.
use crate::core::market::ListingsSnapshot;
use crate::core::plan::{AcquisitionMethod, NodeId, PlanNode, PlanTree};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt::Display;

/// Normal- and high-quality items are priced separately and are not interchangeable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum PriceLine {
    Nq,
    Hq,
}

impl PriceLine {
    fn price(&self, node: &PlanNode) -> f64 {
        match self {
            PriceLine::Nq => node.market_price_nq,
            PriceLine::Hq => node.market_price_hq,
        }
    }

    fn buy_method(&self) -> AcquisitionMethod {
        match self {
            PriceLine::Nq => AcquisitionMethod::MarketBuyNq,
            PriceLine::Hq => AcquisitionMethod::MarketBuyHq,
        }
    }
}

impl Display for PriceLine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PriceLine::Nq => write!(f, "NQ"),
            PriceLine::Hq => write!(f, "HQ"),
        }
    }
}

/// Cost of one side of the comparison. `complete` is false when some price in
/// the calculation was unknown and counted as zero.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Cost {
    pub amount: f64,
    pub complete: bool,
}

impl Cost {
    fn of(unit_price: f64, quantity: u32) -> Self {
        Self {
            amount: unit_price * f64::from(quantity),
            complete: unit_price > 0.0,
        }
    }

    fn known(&self) -> Option<f64> {
        self.complete.then_some(self.amount)
    }
}

impl std::iter::Sum for Cost {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(
            Cost {
                amount: 0.0,
                complete: true,
            },
            |acc, cost| Cost {
                amount: acc.amount + cost.amount,
                complete: acc.complete && cost.complete,
            },
        )
    }
}

fn buy_price(node: &PlanNode) -> Cost {
    match node.method {
        AcquisitionMethod::MarketBuyNq => Cost::of(node.market_price_nq, node.quantity),
        AcquisitionMethod::MarketBuyHq => Cost::of(node.market_price_hq, node.quantity),
        AcquisitionMethod::VendorBuy => Cost::of(node.vendor_price, node.quantity),
        // Paid in another currency, so it adds nothing to a gil total.
        AcquisitionMethod::VendorAlternateCurrency => Cost {
            amount: 0.0,
            complete: true,
        },
        AcquisitionMethod::Craft => Cost::of(node.market_price_nq, node.quantity),
    }
}

fn cost_of(tree: &PlanTree, id: NodeId) -> Cost {
    let node = tree.node(id);
    if node.method.is_direct_buy() || node.is_leaf() {
        return buy_price(node);
    }
    node.children.iter().map(|&child| cost_of(tree, child)).sum()
}

/// What obtaining `id` costs given the acquisition methods currently set in the tree.
///
/// Buy-tagged nodes cost their unit price times quantity. Craft-tagged nodes cost
/// the sum of their ingredients; a Craft-tagged node without ingredients falls
/// back to its market price.
pub fn craft_cost(tree: &PlanTree, id: NodeId) -> f64 {
    cost_of(tree, id).amount
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CraftComparison {
    #[serde(skip)]
    pub node: NodeId,
    pub item_id: u32,
    pub name: String,
    pub quantity: u32,
    pub method: AcquisitionMethod,
    /// Sum of the ingredient costs.
    pub craft: Cost,
    pub buy_nq: Option<f64>,
    pub buy_hq: Option<f64>,
    pub suggestion_nq: Option<AcquisitionMethod>,
    pub suggestion_hq: Option<AcquisitionMethod>,
}

impl CraftComparison {
    pub fn suggestion(&self, line: PriceLine) -> Option<AcquisitionMethod> {
        match line {
            PriceLine::Nq => self.suggestion_nq,
            PriceLine::Hq => self.suggestion_hq,
        }
    }

    /// Savings of crafting over buying on `line`, negative when buying is cheaper.
    pub fn savings(&self, line: PriceLine) -> Option<f64> {
        let buy = match line {
            PriceLine::Nq => self.buy_nq,
            PriceLine::Hq => self.buy_hq,
        }?;
        self.craft.known().map(|craft| buy - craft)
    }
}

fn suggest(craft: &Cost, buy: Option<f64>, line: PriceLine) -> Option<AcquisitionMethod> {
    let craft = craft.known()?;
    let buy = buy?;
    if craft < buy {
        Some(AcquisitionMethod::Craft)
    } else {
        Some(line.buy_method())
    }
}

/// Compares crafting against buying for every node that has ingredients.
pub fn analyze(tree: &PlanTree) -> Vec<CraftComparison> {
    tree.iter()
        .filter(|(_, node)| !node.is_leaf())
        .map(|(id, node)| {
            let craft: Cost = node
                .children
                .iter()
                .map(|&child| cost_of(tree, child))
                .sum();
            let buy_nq = Cost::of(PriceLine::Nq.price(node), node.quantity).known();
            let buy_hq = Cost::of(PriceLine::Hq.price(node), node.quantity).known();
            CraftComparison {
                node: id,
                item_id: node.item_id,
                name: node.name.clone(),
                quantity: node.quantity,
                method: node.method,
                suggestion_nq: suggest(&craft, buy_nq, PriceLine::Nq),
                suggestion_hq: suggest(&craft, buy_hq, PriceLine::Hq),
                craft,
                buy_nq,
                buy_hq,
            }
        })
        .collect()
}

/// Sets every node's NQ/HQ market price to the cheapest listing of that quality.
///
/// Nodes without a snapshot, or without listings of a quality, keep their current
/// price. Returns the number of nodes that received at least one price.
pub fn apply_market_prices(tree: &mut PlanTree, snapshots: &HashMap<u32, ListingsSnapshot>) -> usize {
    let ids: Vec<NodeId> = tree.iter().map(|(id, _)| id).collect();
    let mut updated = 0;
    for id in ids {
        let node = tree.node_mut(id);
        let Some(snapshot) = snapshots.get(&node.item_id) else {
            continue;
        };
        let nq = snapshot.cheapest(false);
        let hq = snapshot.cheapest(true);
        if let Some(price) = nq {
            node.market_price_nq = price as f64;
        }
        if let Some(price) = hq {
            node.market_price_hq = price as f64;
        }
        if nq.is_some() || hq.is_some() {
            updated += 1;
        }
    }
    updated
}
