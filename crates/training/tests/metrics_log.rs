use training::metrics::{read_scalars, MetricsSink, SCALARS_FILE};
use training::ScalarLogger;

#[test]
fn scalar_logger_appends_json_lines() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    {
        let mut logger = ScalarLogger::create(dir.path(), "optha_ma_part")?;
        assert_eq!(logger.path(), dir.path().join("optha_ma_part").join(SCALARS_FILE));
        logger.push_scalar("train_loss", 1.25, 10)?;
        logger.push_scalar("learning_rate", 0.001, 10)?;
    }
    {
        let mut logger = ScalarLogger::create(dir.path(), "optha_ma_part")?;
        logger.push_scalar("train_loss", 0.75, 20)?;
    }

    let records = read_scalars(&dir.path().join("optha_ma_part").join(SCALARS_FILE))?;
    assert_eq!(records.len(), 3);
    assert_eq!(records[0].tag, "train_loss");
    assert_eq!(records[0].value, 1.25);
    assert_eq!(records[1].step, 10);
    assert_eq!(records[2].step, 20);
    assert!(records.iter().all(|r| r.wall_time > 0.0));
    Ok(())
}
