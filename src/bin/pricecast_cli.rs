use pricecast::{
    init_logging, load_session, log_app_start, log_sources_configured, logging_config_from_env,
    startup_config_from_env,
};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let logging_cfg = logging_config_from_env();
    init_logging(&logging_cfg)?;
    log_app_start("pricecast_cli", &logging_cfg);

    let steps = match std::env::var("PRICECAST_STEPS") {
        Ok(raw) => raw.trim().parse::<u32>()?,
        Err(_) => 1,
    };
    let startup_cfg = startup_config_from_env()?;
    log_sources_configured("pricecast_cli", &startup_cfg);

    let session = load_session(&startup_cfg)?;
    let base = session.with_ledger(|ledger| ledger.last().map(|row| (row.date.clone(), row.close)));
    match base {
        Ok((date, close)) => println!(
            "Loaded {} history rows; last close {close:.2} on {date}",
            session.ledger_len()
        ),
        Err(_) => println!("Loaded an empty history"),
    }
    if let Some(report) = session.load_report() {
        if report.duplicate_dates_removed > 0 {
            println!(
                "Dropped {} duplicate dates from {} source rows",
                report.duplicate_dates_removed, report.input_rows
            );
        }
    }

    for step in 1..=steps {
        let result = session.predict_next()?;
        println!("[{step}/{steps}] {}", result.status_line());
    }

    Ok(())
}
