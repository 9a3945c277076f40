use super::ui;
use crate::core::aggregate::{Aggregation, MaterialAggregate};
use crate::core::market::MarketDataProvider;
use crate::core::shopping::{DetailedShoppingPlan, StrategySnapshot, WorldShoppingSummary};
use crate::planner::Planner;
use anyhow::Result;
use comfy_table::{Cell, CellAlignment, Color};
use std::collections::BTreeMap;
use tokio_util::sync::CancellationToken;

fn world_flags(world: &WorldShoppingSummary) -> String {
    let mut flags = Vec::new();
    if world.is_home_world {
        flags.push("home".to_string());
    }
    if world.is_congested {
        flags.push("congested".to_string());
    }
    if world.is_blacklisted {
        flags.push("blacklisted".to_string());
    }
    if world.is_travel_prohibited {
        flags.push("no travel".to_string());
    }
    if !world.has_sufficient_stock() {
        flags.push(format!("short {}", world.shortfall));
    }
    flags.join(", ")
}

fn listing_lines(world: &WorldShoppingSummary) -> String {
    world
        .listings
        .iter()
        .map(|l| {
            let quality = if l.is_hq { " HQ" } else { "" };
            let line = format!(
                "{} x {}{} ({})",
                l.quantity,
                ui::format_gil(l.price_per_unit),
                quality,
                l.retainer_name
            );
            if l.is_additional {
                ui::style_text(&format!("+ {line}"), ui::StyleType::Subtle)
            } else {
                line
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

impl DetailedShoppingPlan {
    pub fn display_as_table(&self) -> String {
        let quality = if self.requires_hq { " (HQ)" } else { "" };
        let mut output = format!(
            "{} x{}{}",
            ui::style_text(&self.name, ui::StyleType::Title),
            self.quantity_needed,
            quality
        );
        if self.is_stale {
            output.push_str(&format!(
                "  {}",
                ui::style_text("[stale market data]", ui::StyleType::Warning)
            ));
        }
        output.push('\n');

        if let Some(error) = &self.error {
            output.push_str(&ui::style_text(error, ui::StyleType::Error));
            return output;
        }

        output.push_str(&ui::style_text(
            &format!("Average price: {:.0}g", self.dc_average_price),
            ui::StyleType::Subtle,
        ));
        output.push_str("\n\n");

        let mut table = ui::new_styled_table();
        table.set_header(vec![
            ui::header_cell(""),
            ui::header_cell("World"),
            ui::header_cell("Total"),
            ui::header_cell("Quantity"),
            ui::header_cell("Best price"),
            ui::header_cell("Listings"),
            ui::header_cell("Notes"),
        ]);

        for (index, world) in self.worlds.iter().enumerate() {
            let marker = if Some(index) == self.recommended {
                Cell::new("*").fg(Color::Green)
            } else {
                Cell::new("")
            };
            let total = if world.is_fully_under_average {
                ui::gil_cell(world.total_cost).fg(Color::Green)
            } else {
                ui::gil_cell(world.total_cost)
            };
            table.add_row(vec![
                marker,
                Cell::new(&world.world_name),
                total,
                Cell::new(format!("{}/{}", world.achieved_quantity, self.quantity_needed))
                    .set_alignment(CellAlignment::Right),
                ui::gil_cell(world.best_single_price),
                Cell::new(listing_lines(world)),
                Cell::new(world_flags(world)).fg(Color::Yellow),
            ]);
        }
        output.push_str(&table.to_string());

        if let Some(parts) = &self.split {
            let summary = parts
                .iter()
                .map(|p| {
                    format!(
                        "{} {} for {}",
                        p.world_name,
                        p.quantity,
                        ui::format_gil(p.total_cost)
                    )
                })
                .collect::<Vec<_>>()
                .join(", ");
            output.push_str(&format!(
                "\n{} {} = {}",
                ui::style_text("Split purchase:", ui::StyleType::TotalLabel),
                summary,
                ui::style_text(
                    &ui::format_gil(self.split_total().unwrap_or(0)),
                    ui::StyleType::TotalValue
                )
            ));
        }
        output
    }
}

/// Groups the chosen purchases by world so they read like a route.
pub fn display_route(plans: &[DetailedShoppingPlan]) -> String {
    let mut stops: BTreeMap<&str, Vec<(String, u64)>> = BTreeMap::new();
    for plan in plans {
        if let Some(parts) = &plan.split {
            for part in parts {
                stops.entry(part.world_name.as_str()).or_default().push((
                    format!("{} x{}", plan.name, part.quantity),
                    part.total_cost,
                ));
            }
        } else if let Some(world) = plan.recommended_world() {
            stops.entry(world.world_name.as_str()).or_default().push((
                format!("{} x{}", plan.name, world.achieved_quantity),
                world.total_cost,
            ));
        }
    }

    let mut table = ui::new_styled_table();
    table.set_header(vec![
        ui::header_cell("World"),
        ui::header_cell("Items"),
        ui::header_cell("Cost"),
    ]);
    for (world, items) in &stops {
        let names = items
            .iter()
            .map(|(name, _)| name.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        let cost: u64 = items.iter().map(|(_, cost)| cost).sum();
        table.add_row(vec![Cell::new(world), Cell::new(names), ui::gil_cell(cost)]);
    }

    let total: u64 = plans.iter().filter_map(DetailedShoppingPlan::planned_cost).sum();
    let failed: Vec<&str> = plans
        .iter()
        .filter(|p| p.error.is_some())
        .map(|p| p.name.as_str())
        .collect();

    let mut output = format!(
        "{}\n\n{}",
        ui::style_text("Shopping route", ui::StyleType::Title),
        table
    );
    output.push_str(&format!(
        "\n\n{}: {}",
        ui::style_text("Total", ui::StyleType::TotalLabel),
        ui::style_text(&ui::format_gil(total), ui::StyleType::TotalValue)
    ));
    if !failed.is_empty() {
        output.push_str(&format!(
            "\n{}",
            ui::style_text(
                &format!("Not planned: {}", failed.join(", ")),
                ui::StyleType::Error
            )
        ));
    }
    output
}

fn display_vendor_items(vendor: &[&MaterialAggregate], alternate: &[MaterialAggregate]) -> String {
    let mut table = ui::new_styled_table();
    table.set_header(vec![
        ui::header_cell("Vendor item"),
        ui::header_cell("Quantity"),
        ui::header_cell("Unit price"),
        ui::header_cell("Total"),
    ]);
    for item in vendor {
        table.add_row(vec![
            Cell::new(&item.name),
            Cell::new(item.total_quantity).set_alignment(CellAlignment::Right),
            ui::format_optional_cell((item.unit_price > 0.0).then_some(item.unit_price), |p| {
                format!("{p:.0}g")
            }),
            ui::format_optional_cell((item.unit_price > 0.0).then(|| item.total_cost()), |c| {
                format!("{c:.0}g")
            }),
        ]);
    }
    for item in alternate {
        table.add_row(vec![
            Cell::new(&item.name),
            Cell::new(item.total_quantity).set_alignment(CellAlignment::Right),
            Cell::new("special currency").fg(Color::DarkGrey),
            ui::na_cell(false),
        ]);
    }
    table.to_string()
}

pub fn strategy_snapshots(plans: &[DetailedShoppingPlan]) -> Vec<StrategySnapshot> {
    plans
        .iter()
        .map(DetailedShoppingPlan::strategy_snapshot)
        .collect()
}

pub async fn run<P: MarketDataProvider + 'static>(
    planner: &Planner<P>,
    aggregation: &Aggregation,
    cancel: &CancellationToken,
    json: bool,
) -> Result<()> {
    let (vendor, market): (Vec<&MaterialAggregate>, Vec<&MaterialAggregate>) = aggregation
        .materials
        .iter()
        .partition(|m| m.vendor_only);
    let market: Vec<MaterialAggregate> = market.into_iter().cloned().collect();

    let pb = ui::new_progress_bar(market.len() as u64, true);
    pb.set_message(format!("Fetching listings from {}...", planner.scope().label()));
    let plans = planner
        .plan_materials(&market, cancel, &|| pb.inc(1))
        .await;
    pb.finish_and_clear();

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&strategy_snapshots(&plans))?
        );
        return Ok(());
    }

    let count = plans.len();
    for (i, plan) in plans.iter().enumerate() {
        println!("{}", plan.display_as_table());
        if i + 1 < count {
            ui::print_separator();
        }
    }
    if !vendor.is_empty() || !aggregation.alternate_currency.is_empty() {
        ui::print_separator();
        println!(
            "{}",
            display_vendor_items(&vendor, &aggregation.alternate_currency)
        );
    }
    if !plans.is_empty() {
        ui::print_separator();
        println!("{}", display_route(&plans));
    }
    Ok(())
}
