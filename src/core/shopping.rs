//! Multi-market shopping optimizer.
//!
//! For one aggregated material this summarizes what buying on each world would
//! look like, drops clearly dominated worlds, ranks the rest by the selected
//! [`RecommendationMode`] and, when worthwhile, proposes splitting the purchase
//! across several worlds. Every item is optimized on its own; the only
//! cross-item coupling is the soft bias applied by [`apply_preferences`].

use crate::core::aggregate::MaterialAggregate;
use crate::core::market::{Listing, ListingsSnapshot};
use anyhow::anyhow;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt::Display;
use std::str::FromStr;

/// A listing is worth buying when it covers this share of the requested
/// quantity or when it is priced at or below the data center average.
const MIN_STACK_SHARE: f64 = 0.2;
/// Skipped listings shown next to a world's purchase for comparison.
const SUPPLEMENTARY_LISTINGS: usize = 2;
const MIN_CANDIDATE_WORLDS: usize = 3;
const BEST_PRICE_TOLERANCE: f64 = 1.2;
const TOTAL_COST_TOLERANCE: f64 = 1.5;
const MAX_SPLIT_WORLDS: usize = 3;
/// Cost penalty applied at travel weight 100 to a world not otherwise visited.
const MAX_TRAVEL_PENALTY: f64 = 0.25;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendationMode {
    #[default]
    MinimizeTotalCost,
    MaximizeValue,
    BestUnitPrice,
}

impl Display for RecommendationMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                RecommendationMode::MinimizeTotalCost => "minimize-total-cost",
                RecommendationMode::MaximizeValue => "maximize-value",
                RecommendationMode::BestUnitPrice => "best-unit-price",
            }
        )
    }
}

impl FromStr for RecommendationMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace(['-', ' '], "_").as_str() {
            "minimize_total_cost" | "cost" => Ok(RecommendationMode::MinimizeTotalCost),
            "maximize_value" | "value" => Ok(RecommendationMode::MaximizeValue),
            "best_unit_price" | "unit" => Ok(RecommendationMode::BestUnitPrice),
            _ => Err(anyhow!("Invalid recommendation mode: {}", s)),
        }
    }
}

/// Tunables of the optimizer, usually built from the app configuration.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ShoppingOptions {
    pub mode: RecommendationMode,
    /// 0 ignores travel entirely, 100 strongly prefers worlds already visited.
    pub travel_weight: u8,
    /// Percent discount applied to worlds already chosen for another item.
    pub consolidation_bonus: f64,
    /// A split purchase must save at least this percent to be proposed.
    pub min_split_savings_pct: f64,
    pub home_world: Option<String>,
    pub blacklisted_worlds: Vec<String>,
    pub congested_worlds: Vec<String>,
    pub travel_prohibited_worlds: Vec<String>,
}

impl ShoppingOptions {
    pub fn with_mode(mode: RecommendationMode) -> Self {
        Self {
            mode,
            ..Self::default()
        }
    }

    fn is_home(&self, world: &str) -> bool {
        self.home_world
            .as_deref()
            .is_some_and(|home| home.eq_ignore_ascii_case(world))
    }
}

fn listed(worlds: &[String], world: &str) -> bool {
    worlds.iter().any(|w| w.eq_ignore_ascii_case(world))
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ListingEntry {
    pub quantity: u32,
    pub price_per_unit: u64,
    pub retainer_name: String,
    pub is_hq: bool,
    /// Part of the stack that counts toward the requested quantity.
    pub needed_from_stack: u32,
    /// Part of the stack bought beyond the requested quantity.
    pub excess_quantity: u32,
    /// Shown for price comparison only; not part of the purchase.
    pub is_additional: bool,
}

impl ListingEntry {
    fn purchased(listing: &Listing, needed: u32) -> Self {
        Self {
            quantity: listing.quantity,
            price_per_unit: listing.price_per_unit,
            retainer_name: listing.retainer_name.clone(),
            is_hq: listing.is_hq,
            needed_from_stack: needed,
            excess_quantity: listing.quantity - needed,
            is_additional: false,
        }
    }

    fn supplementary(listing: &Listing) -> Self {
        Self {
            needed_from_stack: 0,
            excess_quantity: 0,
            is_additional: true,
            ..Self::purchased(listing, listing.quantity)
        }
    }

    /// Whole stacks are bought, so this is the full stack price.
    pub fn subtotal(&self) -> u64 {
        self.price_per_unit * u64::from(self.quantity)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorldShoppingSummary {
    pub world_name: String,
    pub listings: Vec<ListingEntry>,
    pub total_cost: u64,
    /// Units bought, including excess.
    pub total_quantity_purchased: u32,
    /// Units that count toward the request; never above it.
    pub achieved_quantity: u32,
    pub shortfall: u32,
    /// Cheapest included listing; the "value score".
    pub best_single_price: u64,
    pub is_fully_under_average: bool,
    pub is_home_world: bool,
    pub is_congested: bool,
    pub is_blacklisted: bool,
    pub is_travel_prohibited: bool,
}

impl WorldShoppingSummary {
    pub fn has_sufficient_stock(&self) -> bool {
        self.shortfall == 0
    }

    pub fn is_accessible(&self) -> bool {
        !self.is_blacklisted && !self.is_travel_prohibited
    }

    pub fn average_unit_price(&self) -> f64 {
        if self.total_quantity_purchased == 0 {
            return 0.0;
        }
        self.total_cost as f64 / f64::from(self.total_quantity_purchased)
    }

    pub fn purchased_listings(&self) -> impl Iterator<Item = &ListingEntry> {
        self.listings.iter().filter(|l| !l.is_additional)
    }

    fn apply_accessibility(&mut self, options: &ShoppingOptions) {
        self.is_home_world = options.is_home(&self.world_name);
        self.is_congested = listed(&options.congested_worlds, &self.world_name);
        self.is_blacklisted = listed(&options.blacklisted_worlds, &self.world_name);
        self.is_travel_prohibited = listed(&options.travel_prohibited_worlds, &self.world_name);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SplitWorldPurchase {
    pub world_name: String,
    pub quantity: u32,
    pub total_cost: u64,
    pub listings: Vec<ListingEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetailedShoppingPlan {
    pub item_id: u32,
    pub name: String,
    pub quantity_needed: u32,
    pub requires_hq: bool,
    pub dc_average_price: f64,
    pub worlds: Vec<WorldShoppingSummary>,
    /// Index into `worlds`.
    pub recommended: Option<usize>,
    pub split: Option<Vec<SplitWorldPurchase>>,
    /// Best split across worlds, kept even when not worth proposing so the
    /// check can be redone once the recommendation changes.
    #[serde(skip)]
    split_candidate: Option<Vec<SplitWorldPurchase>>,
    pub error: Option<String>,
    /// Listing data came from an older cache entry after a failed refresh.
    pub is_stale: bool,
    pub data_time: Option<DateTime<Utc>>,
}

impl DetailedShoppingPlan {
    fn empty(material: &MaterialAggregate) -> Self {
        Self {
            item_id: material.item_id,
            name: material.name.clone(),
            quantity_needed: material.total_quantity,
            requires_hq: material.requires_hq,
            dc_average_price: 0.0,
            worlds: Vec::new(),
            recommended: None,
            split: None,
            split_candidate: None,
            error: None,
            is_stale: false,
            data_time: None,
        }
    }

    /// A plan that only carries an explanation of why it could not be built.
    pub fn failed(material: &MaterialAggregate, error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::empty(material)
        }
    }

    fn refresh_split(&mut self, min_savings_pct: f64) {
        let recommended = self.recommended_world();
        self.split = self
            .split_candidate
            .as_ref()
            .filter(|parts| {
                split_is_worthwhile(parts, recommended, self.quantity_needed, min_savings_pct)
            })
            .cloned();
    }

    pub fn recommended_world(&self) -> Option<&WorldShoppingSummary> {
        self.recommended.and_then(|index| self.worlds.get(index))
    }

    pub fn split_total(&self) -> Option<u64> {
        self.split
            .as_ref()
            .map(|parts| parts.iter().map(|p| p.total_cost).sum())
    }

    /// Cost of the cheapest proposed way to buy this item.
    pub fn planned_cost(&self) -> Option<u64> {
        match (self.split_total(), self.recommended_world()) {
            (Some(split), _) => Some(split),
            (None, Some(world)) => Some(world.total_cost),
            (None, None) => None,
        }
    }

    /// Flat record of the chosen strategy, suitable for saving alongside a plan.
    pub fn strategy_snapshot(&self) -> StrategySnapshot {
        let world = self.recommended_world();
        StrategySnapshot {
            item_id: self.item_id,
            name: self.name.clone(),
            quantity: self.quantity_needed,
            recommended_world: world.map(|w| w.world_name.clone()),
            total_cost: world.map(|w| w.total_cost),
            split_worlds: self
                .split
                .as_ref()
                .map(|parts| parts.iter().map(|p| p.world_name.clone()).collect())
                .unwrap_or_default(),
            listings: world
                .map(|w| {
                    w.purchased_listings()
                        .take(3)
                        .map(|l| SnapshotListing {
                            quantity: l.quantity,
                            price_per_unit: l.price_per_unit,
                            retainer_name: l.retainer_name.clone(),
                            is_hq: l.is_hq,
                        })
                        .collect()
                })
                .unwrap_or_default(),
            error: self.error.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotListing {
    pub quantity: u32,
    pub price_per_unit: u64,
    pub retainer_name: String,
    pub is_hq: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategySnapshot {
    pub item_id: u32,
    pub name: String,
    pub quantity: u32,
    pub recommended_world: Option<String>,
    pub total_cost: Option<u64>,
    pub split_worlds: Vec<String>,
    pub listings: Vec<SnapshotListing>,
    pub error: Option<String>,
}

fn is_worth_buying(listing: &Listing, requested: u32, average: f64) -> bool {
    f64::from(listing.quantity) >= f64::from(requested) * MIN_STACK_SHARE
        || listing.price_per_unit as f64 <= average
}

/// Greedily buys the cheapest worthwhile listings of one world.
///
/// `listings` must be sorted by ascending unit price.
pub fn summarize_world(
    world_name: &str,
    listings: &[&Listing],
    requested: u32,
    average: f64,
) -> WorldShoppingSummary {
    let mut entries = Vec::new();
    let mut included = vec![false; listings.len()];
    let mut remaining = requested;
    let mut total_cost = 0;
    let mut purchased = 0u32;

    for (index, listing) in listings.iter().enumerate() {
        if remaining == 0 {
            break;
        }
        if !is_worth_buying(listing, requested, average) {
            continue;
        }
        let needed = listing.quantity.min(remaining);
        remaining -= needed;
        total_cost += listing.subtotal();
        purchased = purchased.saturating_add(listing.quantity);
        included[index] = true;
        entries.push(ListingEntry::purchased(listing, needed));
    }

    let best_single_price = entries.first().map_or(0, |e| e.price_per_unit);
    let is_fully_under_average =
        !entries.is_empty() && entries.iter().all(|e| e.price_per_unit as f64 <= average);

    entries.extend(
        listings
            .iter()
            .zip(&included)
            .filter(|(_, taken)| !**taken)
            .take(SUPPLEMENTARY_LISTINGS)
            .map(|(listing, _)| ListingEntry::supplementary(listing)),
    );

    WorldShoppingSummary {
        world_name: world_name.to_string(),
        listings: entries,
        total_cost,
        total_quantity_purchased: purchased,
        achieved_quantity: requested - remaining,
        shortfall: remaining,
        best_single_price,
        is_fully_under_average,
        is_home_world: false,
        is_congested: false,
        is_blacklisted: false,
        is_travel_prohibited: false,
    }
}

/// Drops worlds that are clearly worse than the best ones, keeping at least
/// [`MIN_CANDIDATE_WORLDS`].
pub fn filter_worlds(worlds: Vec<WorldShoppingSummary>) -> Vec<WorldShoppingSummary> {
    if worlds.len() <= MIN_CANDIDATE_WORLDS {
        return worlds;
    }

    let best_price = worlds.iter().map(|w| w.best_single_price).min().unwrap_or(0);
    let min_total = worlds.iter().map(|w| w.total_cost).min().unwrap_or(0);

    let (mut kept, mut dropped): (Vec<_>, Vec<_>) = worlds.into_iter().partition(|w| {
        w.best_single_price as f64 <= best_price as f64 * BEST_PRICE_TOLERANCE
            || w.total_cost as f64 <= min_total as f64 * TOTAL_COST_TOLERANCE
            || w.is_fully_under_average
    });

    if kept.len() < MIN_CANDIDATE_WORLDS {
        dropped.sort_by(|a, b| {
            a.total_cost
                .cmp(&b.total_cost)
                .then_with(|| a.world_name.cmp(&b.world_name))
        });
        let missing = MIN_CANDIDATE_WORLDS - kept.len();
        kept.extend(dropped.into_iter().take(missing));
    }
    kept
}

fn compare_by_mode(
    a: &WorldShoppingSummary,
    b: &WorldShoppingSummary,
    mode: RecommendationMode,
) -> Ordering {
    match mode {
        RecommendationMode::MinimizeTotalCost => a
            .total_cost
            .cmp(&b.total_cost)
            .then_with(|| a.world_name.cmp(&b.world_name)),
        RecommendationMode::MaximizeValue => a
            .best_single_price
            .cmp(&b.best_single_price)
            .then_with(|| a.total_cost.cmp(&b.total_cost))
            .then_with(|| a.world_name.cmp(&b.world_name)),
        RecommendationMode::BestUnitPrice => a
            .best_single_price
            .cmp(&b.best_single_price)
            .then_with(|| a.world_name.cmp(&b.world_name)),
    }
}

/// Orders worlds best first by the mode alone. A shortfall on the first world
/// is covered by a split purchase.
pub fn rank_worlds(worlds: &mut [WorldShoppingSummary], mode: RecommendationMode) {
    worlds.sort_by(|a, b| compare_by_mode(a, b, mode));
}

fn group_by_world<'a>(listings: &[&'a Listing]) -> BTreeMap<&'a str, Vec<&'a Listing>> {
    let mut groups: BTreeMap<&str, Vec<&Listing>> = BTreeMap::new();
    for &listing in listings {
        groups
            .entry(listing.world_name.as_str())
            .or_default()
            .push(listing);
    }
    for group in groups.values_mut() {
        group.sort_by_key(|l| l.price_per_unit);
    }
    groups
}

/// Builds the shopping plan for one material with default options.
pub fn plan(
    material: &MaterialAggregate,
    snapshot: &ListingsSnapshot,
    mode: RecommendationMode,
) -> DetailedShoppingPlan {
    plan_material(material, snapshot, &ShoppingOptions::with_mode(mode))
}

pub fn plan_material(
    material: &MaterialAggregate,
    snapshot: &ListingsSnapshot,
    options: &ShoppingOptions,
) -> DetailedShoppingPlan {
    let mut plan = DetailedShoppingPlan::empty(material);
    plan.dc_average_price = snapshot.average_price;
    plan.data_time = snapshot.last_upload;

    let requested = material.total_quantity;
    if requested == 0 {
        return plan;
    }

    let listings: Vec<&Listing> = snapshot
        .listings
        .iter()
        .filter(|l| !material.requires_hq || l.is_hq)
        .filter(|l| l.quantity > 0)
        .collect();
    if listings.is_empty() {
        let quality = if material.requires_hq { "HQ " } else { "" };
        plan.error = Some(format!("No {quality}listings found for {}", material.name));
        return plan;
    }

    let groups = group_by_world(&listings);
    let candidates: Vec<_> = groups
        .iter()
        .map(|(world, group)| summarize_world(world, group, requested, snapshot.average_price))
        .filter(|summary| summary.achieved_quantity > 0)
        .collect();
    if candidates.is_empty() {
        plan.error = Some(format!("No worthwhile listings found for {}", material.name));
        return plan;
    }

    let mut worlds = filter_worlds(candidates);
    for world in &mut worlds {
        world.apply_accessibility(options);
    }
    rank_worlds(&mut worlds, options.mode);

    plan.recommended = worlds
        .iter()
        .position(WorldShoppingSummary::is_accessible)
        .or(Some(0));
    plan.split_candidate = propose_split(&worlds, &groups, requested, snapshot.average_price);
    plan.worlds = worlds;
    plan.refresh_split(options.min_split_savings_pct);
    plan
}

/// Pools the listings of the accessible candidate worlds and buys the cheapest
/// worthwhile stacks across at most [`MAX_SPLIT_WORLDS`] worlds.
///
/// Whether the split is proposed depends on the recommended world; see
/// [`DetailedShoppingPlan::split`].
pub fn propose_split(
    worlds: &[WorldShoppingSummary],
    groups: &BTreeMap<&str, Vec<&Listing>>,
    requested: u32,
    average: f64,
) -> Option<Vec<SplitWorldPurchase>> {
    let mut pool: Vec<&Listing> = worlds
        .iter()
        .filter(|w| w.is_accessible())
        .filter_map(|w| groups.get(w.world_name.as_str()))
        .flatten()
        .copied()
        .collect();
    pool.sort_by(|a, b| {
        a.price_per_unit
            .cmp(&b.price_per_unit)
            .then_with(|| a.world_name.cmp(&b.world_name))
    });

    let mut parts: Vec<SplitWorldPurchase> = Vec::new();
    let mut remaining = requested;
    for listing in pool {
        if remaining == 0 {
            break;
        }
        if !is_worth_buying(listing, requested, average) {
            continue;
        }
        let index = match parts.iter().position(|p| p.world_name == listing.world_name) {
            Some(index) => index,
            None if parts.len() < MAX_SPLIT_WORLDS => {
                parts.push(SplitWorldPurchase {
                    world_name: listing.world_name.clone(),
                    quantity: 0,
                    total_cost: 0,
                    listings: Vec::new(),
                });
                parts.len() - 1
            }
            None => continue,
        };
        let needed = listing.quantity.min(remaining);
        remaining -= needed;
        let part = &mut parts[index];
        part.quantity += needed;
        part.total_cost += listing.subtotal();
        part.listings.push(ListingEntry::purchased(listing, needed));
    }

    (parts.len() >= 2).then_some(parts)
}

fn split_is_worthwhile(
    parts: &[SplitWorldPurchase],
    recommended: Option<&WorldShoppingSummary>,
    requested: u32,
    min_savings_pct: f64,
) -> bool {
    let split_quantity: u32 = parts.iter().map(|p| p.quantity).sum();
    let split_cost: u64 = parts.iter().map(|p| p.total_cost).sum();
    match recommended {
        None => true,
        Some(world) if !world.has_sufficient_stock() => split_quantity > world.achieved_quantity,
        Some(world) => {
            let threshold = world.total_cost as f64 * (1.0 - min_savings_pct / 100.0);
            split_quantity >= requested
                && split_cost < world.total_cost
                && split_cost as f64 <= threshold
        }
    }
}

/// Merges snapshots fetched from several data centers into one.
///
/// Listings keep the data center they came from; world names that occur in
/// more than one data center are qualified with it. The combined average is the
/// mean of the per-data-center averages that are known.
pub fn merge_region_snapshots(
    item_id: u32,
    label: &str,
    parts: Vec<(String, ListingsSnapshot)>,
) -> ListingsSnapshot {
    let mut regions_by_world: HashMap<String, HashSet<String>> = HashMap::new();
    for (region, snapshot) in &parts {
        for listing in &snapshot.listings {
            regions_by_world
                .entry(listing.world_name.clone())
                .or_default()
                .insert(region.clone());
        }
    }

    let averages: Vec<f64> = parts
        .iter()
        .map(|(_, s)| s.average_price)
        .filter(|avg| *avg > 0.0)
        .collect();
    let average_price = if averages.is_empty() {
        0.0
    } else {
        averages.iter().sum::<f64>() / averages.len() as f64
    };
    let last_upload = parts.iter().filter_map(|(_, s)| s.last_upload).max();

    let listings = parts
        .into_iter()
        .flat_map(|(region, snapshot)| {
            let regions_by_world = &regions_by_world;
            snapshot.listings.into_iter().map(move |mut listing| {
                let collides = regions_by_world
                    .get(&listing.world_name)
                    .is_some_and(|regions| regions.len() > 1);
                if collides {
                    listing.world_name = format!("{} ({})", listing.world_name, region);
                }
                listing.region = Some(region.clone());
                listing
            })
        })
        .collect();

    ListingsSnapshot {
        item_id,
        market: label.to_string(),
        listings,
        average_price,
        last_upload,
    }
}

fn preference_factor(
    world: &WorldShoppingSummary,
    chosen: &HashSet<String>,
    options: &ShoppingOptions,
) -> f64 {
    let already_chosen = chosen.contains(&world.world_name.to_lowercase());
    let mut factor = 1.0;
    if !world.is_home_world && !already_chosen {
        factor += f64::from(options.travel_weight.min(100)) / 100.0 * MAX_TRAVEL_PENALTY;
    }
    if already_chosen {
        factor -= options.consolidation_bonus / 100.0;
    }
    factor
}

/// Same ordering as [`compare_by_mode`], with every price term scaled by the
/// world's travel and consolidation factor.
fn compare_with_preferences(
    a: &WorldShoppingSummary,
    b: &WorldShoppingSummary,
    chosen: &HashSet<String>,
    options: &ShoppingOptions,
) -> Ordering {
    let (fa, fb) = (
        preference_factor(a, chosen, options),
        preference_factor(b, chosen, options),
    );
    let scaled = |x: u64, y: u64| (x as f64 * fa).total_cmp(&(y as f64 * fb));
    let total = || scaled(a.total_cost, b.total_cost);
    let best = || scaled(a.best_single_price, b.best_single_price);
    let name = || a.world_name.cmp(&b.world_name);
    match options.mode {
        RecommendationMode::MinimizeTotalCost => total().then_with(name),
        RecommendationMode::MaximizeValue | RecommendationMode::BestUnitPrice => {
            best().then_with(total).then_with(name)
        }
    }
}

/// Re-chooses recommendations with a soft bias toward the home world and toward
/// worlds already picked for other items.
///
/// The bias scales the prices the recommendation mode compares, so the mode
/// still decides. Plans are visited from the most to the least expensive, so
/// big purchases anchor the route. Without a travel weight or consolidation
/// bonus this changes nothing.
pub fn apply_preferences(plans: &mut [DetailedShoppingPlan], options: &ShoppingOptions) {
    if options.travel_weight == 0 && options.consolidation_bonus <= 0.0 {
        return;
    }

    let mut order: Vec<usize> = (0..plans.len())
        .filter(|&i| plans[i].recommended_world().is_some())
        .collect();
    order.sort_by_key(|&i| {
        std::cmp::Reverse(plans[i].recommended_world().map_or(0, |w| w.total_cost))
    });

    let mut chosen: HashSet<String> = HashSet::new();
    for index in order {
        let plan = &mut plans[index];
        let best = plan
            .worlds
            .iter()
            .enumerate()
            .filter(|(_, w)| w.is_accessible())
            .min_by(|(_, a), (_, b)| compare_with_preferences(a, b, &chosen, options))
            .map(|(i, _)| i);

        if let Some(best) = best
            && plan.recommended != Some(best)
        {
            plan.recommended = Some(best);
            plan.refresh_split(options.min_split_savings_pct);
        }
        if let Some(world) = plan.recommended_world() {
            chosen.insert(world.world_name.to_lowercase());
        }
    }
}
