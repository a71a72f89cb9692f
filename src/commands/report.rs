//! `retailiq report` - retail KPI reports

use anyhow::{Context, Result};
use clap::Subcommand;
use retailiq_analytics::{save_report, RetailAnalytics};
use retailiq_config::RuntimeConfig;
use std::path::PathBuf;

use super::{open_warehouse, print_batch};

#[derive(Subcommand)]
pub enum ReportCommand {
    /// Sales, profit and orders per year with growth
    Yoy {
        /// Years to compare, comma separated (default from config)
        #[arg(long, value_delimiter = ',')]
        years: Vec<i64>,
    },
    /// Performance per product category
    Category,
    /// Performance per customer region for one year
    Region {
        #[arg(long)]
        year: Option<i64>,
        /// Regions, comma separated (default from config)
        #[arg(long, value_delimiter = ',')]
        regions: Vec<String>,
    },
    /// Top customers by total sales
    Customers {
        #[arg(long)]
        top: Option<usize>,
    },
    /// Monthly sales per category for one year
    Monthly {
        #[arg(long)]
        year: Option<i64>,
    },
    /// Every report, saved as CSV files
    Full {
        /// Output directory (overrides analytics.report_dir)
        #[arg(short, long, value_name = "DIR")]
        output: Option<PathBuf>,
    },
}

impl ReportCommand {
    pub fn run(self, config: &RuntimeConfig) -> Result<()> {
        let warehouse = open_warehouse(config)?;
        let analytics = RetailAnalytics::new(&warehouse, &config.analytics.columns)
            .context("Failed to prepare analytics")?;
        let defaults = &config.analytics.reports;

        match self {
            ReportCommand::Yoy { years } => {
                let years = if years.is_empty() {
                    defaults.years.clone()
                } else {
                    years
                };
                print_batch(&analytics.year_over_year_growth(&years)?, "Growth report")
            }
            ReportCommand::Category => {
                print_batch(&analytics.category_performance()?, "Category report")
            }
            ReportCommand::Region { year, regions } => {
                let regions = if regions.is_empty() {
                    defaults.regions.clone()
                } else {
                    regions
                };
                let batch = analytics
                    .regional_performance(year.unwrap_or(defaults.year), regions.as_slice())?;
                print_batch(&batch, "Regional report")
            }
            ReportCommand::Customers { top } => {
                let batch = analytics.customer_lifetime_value(top.unwrap_or(defaults.top_n))?;
                print_batch(&batch, "Customer report")
            }
            ReportCommand::Monthly { year } => {
                let batch = analytics.monthly_sales_by_category(year.unwrap_or(defaults.year))?;
                print_batch(&batch, "Monthly report")
            }
            ReportCommand::Full { output } => {
                let dir = output.unwrap_or_else(|| PathBuf::from(&config.analytics.report_dir));
                let reports = analytics.full_report(defaults)?;
                for report in &reports {
                    println!("== {} ==", report.name);
                    print_batch(&report.batch, &report.name)?;
                }
                let written = save_report(&reports, &dir)?;
                for path in &written {
                    println!("Saved {}", path.display());
                }
                Ok(())
            }
        }
    }
}
