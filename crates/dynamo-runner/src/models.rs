//! Built-in models.
//!
//! Each model declares its settings, builds its quantity network from a
//! committed settings registry, and names the series a run reports by default.

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::info;

use dynamo_core::{Constraint, DiagnosticsMode, ModelBuilder, Scheduler, TableSet};
use dynamo_settings::{SettingDef, Settings, SettingsError};

use crate::error::RunError;
use crate::tables::{ORDER_FULFILLMENT, SHIPPING_LOSS};

/// Construction options that do not come from the settings registry.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuildOptions {
    pub initial_time: f64,
    pub diagnostics: DiagnosticsMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    /// One stock draining at a fixed fraction per unit time
    #[default]
    Decay,
    /// Stock-management loop: forecast, perception delay, order pipeline
    Inventory,
}

const DECAY_ORDER: &[&str] = &[];

const INVENTORY_ORDER: &[&str] = &[
    "customer_demand",
    "expected_demand",
    "perceived_inventory",
    "desired_inventory",
    "inventory_gap",
    "coverage",
    "fill_rate",
    "orders",
    "arrivals",
    "transit_loss",
];

impl ModelKind {
    pub fn name(self) -> &'static str {
        match self {
            ModelKind::Decay => "decay",
            ModelKind::Inventory => "inventory",
        }
    }

    pub fn default_dt(self) -> f64 {
        match self {
            ModelKind::Decay => 1.0,
            ModelKind::Inventory => 0.25,
        }
    }

    pub fn default_final_time(self) -> f64 {
        match self {
            ModelKind::Decay => 10.0,
            ModelKind::Inventory => 50.0,
        }
    }

    pub fn default_series(self) -> &'static [&'static str] {
        match self {
            ModelKind::Decay => &["level", "outflow"],
            ModelKind::Inventory => &[
                "customer_demand",
                "expected_demand",
                "inventory",
                "perceived_inventory",
                "orders",
                "arrivals",
                "shipments",
                "net_change",
            ],
        }
    }

    fn setting_defs(self) -> Vec<SettingDef> {
        match self {
            ModelKind::Decay => vec![
                SettingDef::new("initial_level", 100.0, 0.0, 1.0e6, 10.0)
                    .with_description("starting level"),
                SettingDef::new("decay_rate", 0.1, 0.0, 1.0, 0.01)
                    .with_description("fraction drained per unit time"),
            ],
            ModelKind::Inventory => vec![
                SettingDef::new("initial_inventory", 400.0, 0.0, 1.0e5, 10.0),
                SettingDef::new("base_demand", 100.0, 0.0, 1.0e4, 5.0)
                    .with_description("customer demand before the step"),
                SettingDef::new("demand_step", 20.0, -100.0, 1.0e4, 5.0)
                    .with_description("change in customer demand at step_time"),
                SettingDef::new("step_time", 10.0, 0.0, 1.0e3, 1.0),
                SettingDef::new("forecast_time", 4.0, 0.25, 52.0, 0.25)
                    .with_description("demand smoothing time"),
                SettingDef::new("perception_time", 2.0, 0.25, 52.0, 0.25)
                    .with_description("inventory reporting delay"),
                SettingDef::new("coverage_target", 4.0, 0.5, 26.0, 0.5)
                    .with_description("weeks of expected demand to keep on hand"),
                SettingDef::new("adjustment_time", 8.0, 0.25, 104.0, 0.25)
                    .with_description("time to close the inventory gap"),
                SettingDef::new("shipping_delay", 3.0, 0.0, 52.0, 0.25)
                    .with_description("supplier lead time"),
            ],
        }
    }

    /// A registry holding this model's settings at their defaults.
    pub fn default_settings(self) -> Result<Settings, SettingsError> {
        let mut settings = Settings::new();
        for def in self.setting_defs() {
            settings.define(def)?;
        }
        Ok(settings)
    }

    /// Builds and finalizes the model from committed setting values.
    pub fn build(
        self,
        settings: &Settings,
        tables: &TableSet,
        options: BuildOptions,
    ) -> Result<Scheduler, RunError> {
        let mut builder = ModelBuilder::new();
        builder
            .initial_time(options.initial_time)
            .diagnostics(options.diagnostics);

        let order = match self {
            ModelKind::Decay => {
                decay(&mut builder, settings)?;
                DECAY_ORDER
            }
            ModelKind::Inventory => {
                inventory(&mut builder, settings, tables)?;
                INVENTORY_ORDER
            }
        };

        let scheduler = builder.finalize(order)?;
        info!(model = %self, quantities = scheduler.len(), "model built");
        Ok(scheduler)
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

fn decay(builder: &mut ModelBuilder, settings: &Settings) -> Result<(), RunError> {
    let initial_level = settings.get("initial_level")?;
    let decay_rate = settings.get("decay_rate")?;

    builder.set_sector("decay", "level");
    let outflow = builder.handle("outflow");
    let level = builder.stock("level", "units", initial_level, move |f| -f.previous(outflow));
    builder.constrain(level, Constraint::NonNegative);
    builder.flow("outflow", "units/time", move |f| decay_rate * f.current(level));
    Ok(())
}

fn inventory(
    builder: &mut ModelBuilder,
    settings: &Settings,
    tables: &TableSet,
) -> Result<(), RunError> {
    let initial_inventory = settings.get("initial_inventory")?;
    let base_demand = settings.get("base_demand")?;
    let demand_step = settings.get("demand_step")?;
    let step_time = settings.get("step_time")?;
    let forecast_time = settings.get("forecast_time")?;
    let perception_time = settings.get("perception_time")?;
    let coverage_target = settings.get("coverage_target")?;
    let adjustment_time = settings.get("adjustment_time")?;
    let shipping_delay = settings.get("shipping_delay")?;
    let fulfillment = tables.get(ORDER_FULFILLMENT)?.clone();
    let loss = tables.get(SHIPPING_LOSS)?.clone();

    let shipments = builder.handle("shipments");
    let receipts = builder.handle("receipts");

    builder.set_sector("market", "demand");
    let customer_demand = builder.derived("customer_demand", "units/week", move |f| {
        if f.time() >= step_time {
            base_demand + demand_step
        } else {
            base_demand
        }
    });
    let expected_demand =
        builder.smooth("expected_demand", "units/week", "customer_demand", forecast_time);
    builder.constrain(expected_demand, Constraint::NonZero);

    builder.set_sector("warehouse", "stock");
    let inventory = builder.stock("inventory", "units", initial_inventory, move |f| {
        f.previous(receipts) - f.previous(shipments)
    });
    builder.constrain(inventory, Constraint::NonNegative);
    let perceived = builder.delay3("perceived_inventory", "units", "inventory", perception_time);
    let desired = builder.derived("desired_inventory", "units", move |f| {
        coverage_target * f.current(expected_demand)
    });
    let gap = builder.derived("inventory_gap", "units", move |f| {
        f.current(desired) - f.current(perceived)
    });
    let coverage = builder.derived("coverage", "weeks", move |f| {
        f.current(inventory) / f.current(expected_demand)
    });
    let fill_rate = builder.table("fill_rate", "", fulfillment, move |f| f.current(coverage));

    builder.set_sector("supply", "ordering");
    builder.derived("orders", "units/week", move |f| {
        (f.current(expected_demand) + f.current(gap) / adjustment_time).max(0.0)
    });
    let arrivals = builder.delay("arrivals", "units/week", "orders", shipping_delay);
    let transit_loss = builder.table("transit_loss", "", loss, move |f| {
        f.current(arrivals) / f.current(expected_demand)
    });

    builder.set_sector("warehouse", "flows");
    builder.flow("shipments", "units/week", move |f| {
        f.current(customer_demand) * f.current(fill_rate)
    });
    builder.flow("receipts", "units/week", move |f| {
        f.current(arrivals) * (1.0 - f.current(transit_loss))
    });
    // reads this step's flows, so it runs in the extra phase
    builder.derived_after_flows("net_change", "units/week", move |f| {
        f.current(receipts) - f.current(shipments)
    });
    Ok(())
}
