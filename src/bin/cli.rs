#![cfg(not(tarpaulin_include))]

use chrono::Utc;
use prodboard::auth;
use prodboard::export;
use prodboard::filter::{self, FilterRequest};
use prodboard::session::{Access, SessionState};
use prodboard::{Dashboard, DashboardConfig};
use std::env;
use std::fs;

fn usage(program: &str) {
    eprintln!("Usage: {} <command> [args]", program);
    eprintln!("Commands:");
    eprintln!("  upload <file.xlsx>                 Replace the stored dataset");
    eprintln!("  status                             Show upload state and remaining validity");
    eprintln!("  summary [filters]                  Print KPIs and chart series");
    eprintln!("  export <csv|xlsx> <out> [filters]  Write the filtered rows to a file");
    eprintln!("  reset                              Drop the stored dataset");
    eprintln!("  hash-password <password>           Print an Argon2 hash for PRODBOARD_ADMIN_HASH");
    eprintln!("Filters: --months a,b  --machines a,b  --sizes a,b");
}

/// Collect `--months/--machines/--sizes` options into a filter request
fn parse_filters(args: &[String]) -> Result<FilterRequest, String> {
    let (mut months, mut machines, mut sizes) = (None, None, None);
    let mut iter = args.iter();
    while let Some(flag) = iter.next() {
        let value = iter
            .next()
            .ok_or_else(|| format!("missing value for {}", flag))?;
        match flag.as_str() {
            "--months" => months = Some(value.as_str()),
            "--machines" => machines = Some(value.as_str()),
            "--sizes" => sizes = Some(value.as_str()),
            other => return Err(format!("unknown option {}", other)),
        }
    }
    Ok(FilterRequest::from_lists(months, machines, sizes))
}

/// Print the upload prompt for an inactive session
fn print_prompt(access: &Access) {
    match access {
        Access::UploadRequired { notice: Some(notice) } => println!(
            "Upload from {} expired at {}. Please upload a new file.",
            notice.uploaded_at, notice.expired_at
        ),
        _ => println!("No dataset. Please upload a file."),
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        usage(&args[0]);
        return Ok(());
    }

    let dashboard = Dashboard::new(DashboardConfig::from_env()?);
    let mut session = SessionState::empty();
    let now = Utc::now();

    match args[1].as_str() {
        "upload" => {
            let Some(path) = args.get(2) else {
                usage(&args[0]);
                return Ok(());
            };
            let bytes = fs::read(path)?;
            let report = dashboard.upload(&mut session, &bytes, now)?;
            for warning in &report.warnings {
                println!("warning: {}", warning);
            }
            println!(
                "Loaded {} rows from '{}'. Valid for {:.1} hours.",
                report.rows, report.sheet_name, report.remaining_hours
            );
        }
        "status" => {
            let report = dashboard.status(&mut session, now)?;
            println!("state: {:?}", report.state);
            if let Some(uploaded_at) = report.uploaded_at {
                println!("uploaded at: {}", uploaded_at);
                println!("remaining: {:.1} hours", report.remaining_hours);
            }
            if let Some(expiry) = report.expiry {
                println!("expired at: {}", expiry.expired_at);
            }
        }
        "summary" => {
            let request = parse_filters(&args[2..])?;
            let access = dashboard.resolve(&mut session, now)?;
            let Some(dataset) = access.dataset() else {
                print_prompt(&access);
                return Ok(());
            };
            let selection = request.resolve(dataset);
            if let Some(view) = dashboard.view(&access, &selection) {
                for warning in &view.warnings {
                    println!("warning: {}", warning);
                }
                let k = &view.kpis;
                println!("sheet: {} ({} of {} rows)", view.sheet_name, k.row_count, dataset.len());
                println!("valid for: {:.1} hours", view.remaining_hours);
                println!("avg expected:        {}", k.avg_expected);
                println!("avg recorded:        {}", k.avg_recorded);
                println!("performance %:       {}", k.performance_pct);
                println!("% change:            {}", k.change_pct);
                println!("expected weight:     {} (avg {})", k.total_expected_weight, k.avg_expected_weight);
                println!("achieved weight:     {} (avg {})", k.total_achieved_weight, k.avg_achieved_weight);
                println!("achievement %:       {}", k.achievement_pct);
                println!("total hours:         {}", k.total_hours);
                for chart in &view.charts {
                    println!("\n{} [{:?}]", chart.title, chart.kind);
                    for point in &chart.points {
                        println!("  {:<12} {:?}: {:.0}", point.category, point.series, point.value);
                    }
                }
            }
        }
        "export" => {
            let (Some(format), Some(out)) = (args.get(2), args.get(3)) else {
                usage(&args[0]);
                return Ok(());
            };
            let request = parse_filters(&args[4..])?;
            let access = dashboard.resolve(&mut session, now)?;
            let Some(dataset) = access.dataset() else {
                print_prompt(&access);
                return Ok(());
            };
            let rows = filter::apply(dataset, &request.resolve(dataset));
            let bytes = match format.as_str() {
                "csv" => export::to_csv(&rows).into_bytes(),
                "xlsx" => export::to_xlsx(&rows)?,
                other => return Err(format!("unsupported export format '{}'", other).into()),
            };
            fs::write(out, bytes)?;
            println!("Wrote {} rows to {}", rows.len(), out);
        }
        "reset" => {
            dashboard.reset(&mut session)?;
            println!("Dataset cleared.");
        }
        "hash-password" => {
            let Some(password) = args.get(2) else {
                usage(&args[0]);
                return Ok(());
            };
            println!("{}", auth::hash_password(password)?);
        }
        _ => usage(&args[0]),
    }

    Ok(())
}
