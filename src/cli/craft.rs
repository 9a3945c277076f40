use super::ui;
use crate::core::craft_cost::{self, CraftComparison, PriceLine};
use crate::core::market::MarketDataProvider;
use crate::core::plan::{AcquisitionMethod, PlanTree};
use crate::planner::Planner;
use anyhow::Result;
use comfy_table::{Cell, Color};
use tokio_util::sync::CancellationToken;
use tracing::debug;

fn suggestion_cell(comparison: &CraftComparison, line: PriceLine) -> Cell {
    match comparison.suggestion(line) {
        None => ui::na_cell(false),
        Some(method) if method == comparison.method => Cell::new(method.to_string()),
        Some(AcquisitionMethod::Craft) => Cell::new("Craft").fg(Color::Green),
        Some(method) => Cell::new(method.to_string()).fg(Color::Yellow),
    }
}

pub fn display_report(tree: &PlanTree, report: &[CraftComparison]) -> String {
    let mut table = ui::new_styled_table();
    table.set_header(vec![
        ui::header_cell("Item"),
        ui::header_cell("Qty"),
        ui::header_cell("Method"),
        ui::header_cell("Craft cost"),
        ui::header_cell("Buy NQ"),
        ui::header_cell("Buy HQ"),
        ui::header_cell("Saves (NQ)"),
        ui::header_cell("Suggest NQ"),
        ui::header_cell("Suggest HQ"),
    ]);

    for row in report {
        // Indent by depth so the recipe structure stays readable.
        let mut depth = 0;
        let mut parent = tree.node(row.node).parent;
        while let Some(id) = parent {
            depth += 1;
            parent = tree.node(id).parent;
        }
        let craft = if row.craft.complete {
            ui::gil_cell(row.craft.amount.round() as u64)
        } else {
            ui::na_cell(true)
        };
        table.add_row(vec![
            Cell::new(format!("{}{}", "  ".repeat(depth), row.name)),
            Cell::new(row.quantity),
            Cell::new(row.method.to_string()),
            craft,
            ui::format_optional_cell(row.buy_nq, |v| ui::format_gil(v.round() as u64)),
            ui::format_optional_cell(row.buy_hq, |v| ui::format_gil(v.round() as u64)),
            row.savings(PriceLine::Nq)
                .map_or_else(|| ui::na_cell(false), ui::savings_cell),
            suggestion_cell(row, PriceLine::Nq),
            suggestion_cell(row, PriceLine::Hq),
        ]);
    }

    format!(
        "{}\n\n{}",
        ui::style_text("Craft or buy", ui::StyleType::Title),
        table
    )
}

pub async fn run<P: MarketDataProvider + 'static>(
    planner: &Planner<P>,
    tree: &mut PlanTree,
    cancel: &CancellationToken,
) -> Result<()> {
    let item_ids: Vec<u32> = tree
        .iter()
        .filter(|(_, node)| node.can_trade)
        .map(|(_, node)| node.item_id)
        .collect();

    let pb = ui::new_progress_bar(item_ids.len() as u64, true);
    pb.set_message("Fetching prices...");
    let snapshots = planner
        .collect_snapshots(item_ids, cancel, &|| pb.inc(1))
        .await;
    pb.finish_and_clear();

    let priced = craft_cost::apply_market_prices(tree, &snapshots);
    debug!(priced, nodes = tree.len(), "Applied market prices");

    let report = craft_cost::analyze(tree);
    if report.is_empty() {
        println!(
            "{}",
            ui::style_text("Nothing in this plan is crafted.", ui::StyleType::Subtle)
        );
        return Ok(());
    }
    println!("{}", display_report(tree, &report));

    let total: f64 = tree
        .roots()
        .iter()
        .map(|&root| craft_cost::craft_cost(tree, root))
        .sum();
    println!(
        "\n{}: {}",
        ui::style_text("Cost with current methods", ui::StyleType::TotalLabel),
        ui::style_text(&ui::format_gil(total.round() as u64), ui::StyleType::TotalValue)
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::plan::PlanNode;

    #[test]
    fn test_report_lists_crafted_nodes() {
        let mut tree = PlanTree::new();
        let root = tree.add_root(PlanNode::new(1, "Bronze Sword", 1).with_prices(900.0, 0.0, 0.0));
        let ingot = tree.add_child(
            root,
            PlanNode::new(2, "Bronze Ingot", 2).with_prices(100.0, 0.0, 0.0),
        );
        tree.add_child(
            ingot,
            PlanNode::new(3, "Copper Ore", 4)
                .with_method(AcquisitionMethod::MarketBuyNq)
                .with_prices(10.0, 0.0, 0.0),
        );

        let report = craft_cost::analyze(&tree);
        let output = display_report(&tree, &report);

        assert!(output.contains("Bronze Sword"));
        assert!(output.contains("  Bronze Ingot"));
        assert!(!output.contains("Copper Ore"));
        assert!(output.contains("+860g"));
    }
}
