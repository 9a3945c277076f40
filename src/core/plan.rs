//! Acquisition model: the tagged recipe tree a procurement plan is built from.
//!
//! Nodes live in an arena owned by [`PlanTree`]; parent and child links are
//! [`NodeId`] indices, so the parent link is a lookup and never an ownership edge.

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use tracing::debug;

/// How the item behind a tree node is obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AcquisitionMethod {
    #[default]
    Craft,
    #[serde(alias = "nq")]
    MarketBuyNq,
    #[serde(alias = "hq")]
    MarketBuyHq,
    #[serde(alias = "vendor")]
    VendorBuy,
    #[serde(alias = "vendor_alt")]
    VendorAlternateCurrency,
}

impl AcquisitionMethod {
    /// True for every method that acquires the item as-is instead of crafting it.
    pub fn is_direct_buy(&self) -> bool {
        !matches!(self, AcquisitionMethod::Craft)
    }

    pub fn is_market_buy(&self) -> bool {
        matches!(
            self,
            AcquisitionMethod::MarketBuyNq | AcquisitionMethod::MarketBuyHq
        )
    }
}

impl Display for AcquisitionMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                AcquisitionMethod::Craft => "Craft",
                AcquisitionMethod::MarketBuyNq => "Buy NQ",
                AcquisitionMethod::MarketBuyHq => "Buy HQ",
                AcquisitionMethod::VendorBuy => "Vendor",
                AcquisitionMethod::VendorAlternateCurrency => "Vendor (alt. currency)",
            }
        )
    }
}

impl FromStr for AcquisitionMethod {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace(['-', ' '], "_").as_str() {
            "craft" => Ok(AcquisitionMethod::Craft),
            "nq" | "buy_nq" | "market_buy_nq" => Ok(AcquisitionMethod::MarketBuyNq),
            "hq" | "buy_hq" | "market_buy_hq" => Ok(AcquisitionMethod::MarketBuyHq),
            "vendor" | "vendor_buy" => Ok(AcquisitionMethod::VendorBuy),
            "vendor_alt" | "vendor_alternate_currency" => {
                Ok(AcquisitionMethod::VendorAlternateCurrency)
            }
            _ => Err(anyhow!("Invalid acquisition method: {}", s)),
        }
    }
}

/// Index of a node inside its [`PlanTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    pub fn index(&self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlanNode {
    pub item_id: u32,
    pub name: String,
    pub icon_id: u32,
    pub job: Option<String>,
    /// Currently required quantity.
    pub quantity: u32,
    /// Quantity as constructed; propagation always rescales from this value.
    base_quantity: u32,
    pub method: AcquisitionMethod,
    pub requires_hq: bool,
    /// Units produced per craft. Zero means unknown.
    pub yield_per_craft: u32,
    pub can_trade: bool,
    pub market_price_nq: f64,
    pub market_price_hq: f64,
    pub vendor_price: f64,
    /// Expansion stopped here because the item already appears on the path to the root.
    pub is_circular: bool,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
}

impl PlanNode {
    pub fn new(item_id: u32, name: &str, quantity: u32) -> Self {
        Self {
            item_id,
            name: name.to_string(),
            icon_id: 0,
            job: None,
            quantity,
            base_quantity: quantity,
            method: AcquisitionMethod::Craft,
            requires_hq: false,
            yield_per_craft: 1,
            can_trade: true,
            market_price_nq: 0.0,
            market_price_hq: 0.0,
            vendor_price: 0.0,
            is_circular: false,
            parent: None,
            children: Vec::new(),
        }
    }

    pub fn with_method(mut self, method: AcquisitionMethod) -> Self {
        self.method = method;
        self
    }

    pub fn with_yield(mut self, yield_per_craft: u32) -> Self {
        self.yield_per_craft = yield_per_craft;
        self
    }

    pub fn with_prices(mut self, nq: f64, hq: f64, vendor: f64) -> Self {
        self.market_price_nq = nq;
        self.market_price_hq = hq;
        self.vendor_price = vendor;
        self
    }

    pub fn requiring_hq(mut self) -> Self {
        self.requires_hq = true;
        self
    }

    pub fn base_quantity(&self) -> u32 {
        self.base_quantity
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }
}

/// Scales a node quantity for a new parent quantity.
///
/// `ceil(parent_quantity * original / yield)`, or `original` unchanged when the
/// yield is unknown (zero).
pub fn scaled_quantity(parent_quantity: u32, original: u32, yield_per_craft: u32) -> u32 {
    if yield_per_craft == 0 {
        return original;
    }
    let scaled =
        (u64::from(parent_quantity) * u64::from(original)).div_ceil(u64::from(yield_per_craft));
    u32::try_from(scaled).unwrap_or(u32::MAX)
}

#[derive(Debug, Clone, Default)]
pub struct PlanTree {
    nodes: Vec<PlanNode>,
    roots: Vec<NodeId>,
}

impl PlanTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a tree from the already-resolved recipe description.
    pub fn from_specs(specs: &[PlanItemSpec]) -> Self {
        let mut tree = Self::new();
        for spec in specs {
            tree.insert_spec(None, spec);
        }
        debug!(
            nodes = tree.len(),
            roots = tree.roots.len(),
            "Built plan tree"
        );
        tree
    }

    fn insert_spec(&mut self, parent: Option<NodeId>, spec: &PlanItemSpec) -> NodeId {
        let mut node = PlanNode::new(spec.item_id, &spec.name, spec.quantity)
            .with_method(spec.method)
            .with_yield(spec.yield_per_craft)
            .with_prices(0.0, 0.0, spec.vendor_price);
        node.icon_id = spec.icon_id;
        node.job = spec.job.clone();
        node.requires_hq = spec.requires_hq;
        node.can_trade = spec.can_trade;
        node.is_circular = spec.circular;

        let id = match parent {
            Some(parent) => self.add_child(parent, node),
            None => self.add_root(node),
        };
        // A circular node is never expanded further.
        if !spec.circular {
            for ingredient in &spec.ingredients {
                self.insert_spec(Some(id), ingredient);
            }
        }
        id
    }

    pub fn add_root(&mut self, node: PlanNode) -> NodeId {
        let id = self.push(node, None);
        self.roots.push(id);
        id
    }

    pub fn add_child(&mut self, parent: NodeId, node: PlanNode) -> NodeId {
        let id = self.push(node, Some(parent));
        self.nodes[parent.0].children.push(id);
        id
    }

    fn push(&mut self, mut node: PlanNode, parent: Option<NodeId>) -> NodeId {
        let id = NodeId(self.nodes.len());
        node.parent = parent;
        node.children.clear();
        self.nodes.push(node);
        id
    }

    pub fn roots(&self) -> &[NodeId] {
        &self.roots
    }

    pub fn node(&self, id: NodeId) -> &PlanNode {
        &self.nodes[id.0]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut PlanNode {
        &mut self.nodes[id.0]
    }

    pub fn parent(&self, id: NodeId) -> Option<&PlanNode> {
        self.nodes[id.0].parent.map(|parent| &self.nodes[parent.0])
    }

    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &PlanNode)> {
        self.nodes
            .iter()
            .enumerate()
            .map(|(index, node)| (NodeId(index), node))
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn set_method(&mut self, id: NodeId, method: AcquisitionMethod) {
        self.nodes[id.0].method = method;
    }

    /// Recomputes `id`'s quantity for a new parent quantity, then cascades the
    /// node's new quantity to its descendants.
    pub fn propagate_quantity(&mut self, id: NodeId, parent_quantity: u32) {
        let node = &mut self.nodes[id.0];
        let original = node.base_quantity;
        node.quantity = scaled_quantity(parent_quantity, original, node.yield_per_craft);
        let quantity = node.quantity;

        for index in 0..self.nodes[id.0].children.len() {
            let child = self.nodes[id.0].children[index];
            self.propagate_quantity(child, quantity);
        }
    }

    /// Sets a node's required quantity directly and cascades it to the ingredients.
    pub fn set_quantity(&mut self, id: NodeId, quantity: u32) {
        self.nodes[id.0].quantity = quantity;
        for index in 0..self.nodes[id.0].children.len() {
            let child = self.nodes[id.0].children[index];
            self.propagate_quantity(child, quantity);
        }
    }

    pub fn reset_quantities(&mut self) {
        for node in &mut self.nodes {
            node.quantity = node.base_quantity;
        }
    }
}

fn default_yield() -> u32 {
    1
}

fn default_true() -> bool {
    true
}

/// One item of an externally resolved recipe tree.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PlanItemSpec {
    pub item_id: u32,
    pub name: String,
    #[serde(default)]
    pub icon_id: u32,
    #[serde(default)]
    pub job: Option<String>,
    pub quantity: u32,
    #[serde(default)]
    pub method: AcquisitionMethod,
    #[serde(default)]
    pub requires_hq: bool,
    #[serde(rename = "yield", default = "default_yield")]
    pub yield_per_craft: u32,
    #[serde(default = "default_true")]
    pub can_trade: bool,
    #[serde(default)]
    pub vendor_price: f64,
    #[serde(default)]
    pub circular: bool,
    #[serde(default)]
    pub ingredients: Vec<PlanItemSpec>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PlanFile {
    pub name: Option<String>,
    pub items: Vec<PlanItemSpec>,
}

impl PlanFile {
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read plan file: {}", path.as_ref().display()))?;

        let plan: Self = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse plan file: {}", path.as_ref().display()))?;
        debug!(items = plan.items.len(), "Loaded plan file");
        Ok(plan)
    }
}
