//! Weekly reports over seeded daily rows, and scheduled runs over a real store.

use chrono::{NaiveDate, NaiveDateTime};
use tally::store::DailyRow;
use tally::*;
use tally_testdata::{GeneratorConfig, Scenario};
use tempfile::TempDir;

fn day(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2020, 9, d).unwrap()
}

fn at(d: u32, h: u32, m: u32) -> NaiveDateTime {
    day(d).and_hms_opt(h, m, 0).unwrap()
}

fn engine(dir: &TempDir) -> MetricsEngine<FileStore> {
    let registry = EntityRegistry::new(vec![
        Entity::camera("1").with_boundary(Boundary::new("door", (0.5, 0.0), (0.5, 1.0))),
        Entity::camera("2"),
        Entity::area("5").with_occupancy_threshold(20.0),
    ]);
    MetricsEngine::new(MetricConfig::default(), FileStore::new(dir.path()), registry).unwrap()
}

/// Camera 1 counts `In = day of month` from the 14th to the 27th, camera 2
/// adds one `In` per day during the last week.
fn seed_in_out(engine: &MetricsEngine<FileStore>) {
    let family = MetricFamily::InOut;
    let first = engine.entity(family, "1").unwrap();
    let second = engine.entity(family, "2").unwrap();
    for d in 14..=27 {
        let row = DailyRow {
            date: day(d),
            values: vec![d as f64, 1.0],
        };
        engine.store().append_daily_row(first, family, &row).unwrap();
        if d >= 21 {
            let row = DailyRow {
                date: day(d),
                values: vec![1.0, 0.0],
            };
            engine.store().append_daily_row(second, family, &row).unwrap();
        }
    }
}

#[test]
fn calendar_weeks_end_on_sunday() {
    let dir = TempDir::new().unwrap();
    let engine = engine(&dir);
    seed_in_out(&engine);

    // 2020-09-16 is a Wednesday, the 20th and 27th are Sundays.
    let range = WeeklyRange::from_args(0, Some(day(16)), Some(day(27))).unwrap();
    let report = engine
        .weekly_report(MetricFamily::InOut, &["ALL"], range, day(28))
        .unwrap();
    assert_eq!(report.weeks.len(), 2);
    assert_eq!(report.weeks[0].days(), 5);
    assert_eq!(report.metric("In").unwrap(), vec![90.0, 175.0]);
    assert_eq!(report.metric("Out").unwrap(), vec![5.0, 7.0]);

    let json = report.to_json().unwrap();
    assert_eq!(json["Weeks"][0], "2020-09-16 2020-09-20");
    assert_eq!(json["Weeks"][1], "2020-09-21 2020-09-27");
}

#[test]
fn rolling_weeks_end_yesterday() {
    let dir = TempDir::new().unwrap();
    let engine = engine(&dir);
    seed_in_out(&engine);

    let range = WeeklyRange::from_args(2, None, None).unwrap();
    let report = engine
        .weekly_report(MetricFamily::InOut, &["1"], range, day(28))
        .unwrap();
    assert_eq!(report.weeks[0].start, day(14));
    assert_eq!(report.weeks[1].end, day(27));
    assert_eq!(report.metric("In").unwrap(), vec![119.0, 168.0]);

    // A week before any data is all zeros.
    let earlier = engine
        .weekly_report(MetricFamily::InOut, &["1"], range, day(14))
        .unwrap();
    assert_eq!(earlier.metric("In").unwrap(), vec![0.0, 0.0]);
}

#[test]
fn weekly_occupancy_takes_mean_and_max_of_days() {
    let dir = TempDir::new().unwrap();
    let registry = EntityRegistry::new(vec![
        Entity::area("5").with_occupancy_threshold(20.0),
        Entity::area("7").with_occupancy_threshold(10.0),
    ]);
    let engine =
        MetricsEngine::new(MetricConfig::default(), FileStore::new(dir.path()), registry).unwrap();
    let family = MetricFamily::Occupancy;
    let rows = [
        ("5", 14, [2.0, 5.0, 20.0]),
        ("5", 15, [4.0, 9.0, 20.0]),
        ("5", 21, [6.0, 8.0, 20.0]),
        ("7", 14, [1.0, 3.0, 10.0]),
        ("7", 22, [3.0, 12.0, 10.0]),
    ];
    for (id, d, values) in rows {
        let area = engine.entity(family, id).unwrap();
        let row = DailyRow {
            date: day(d),
            values: values.to_vec(),
        };
        engine.store().append_daily_row(area, family, &row).unwrap();
    }

    // Areas add up per day: the 14th is [3, 8, 30]. Empty days do not
    // pull the average down.
    let range = WeeklyRange::from_args(0, Some(day(14)), Some(day(22))).unwrap();
    let report = engine.weekly_report(family, &["ALL"], range, day(23)).unwrap();
    assert_eq!(report.weeks.len(), 2);
    assert_eq!(report.metric("AverageOccupancy").unwrap(), vec![3.5, 4.5]);
    assert_eq!(report.metric("MaxOccupancy").unwrap(), vec![9.0, 12.0]);
    assert_eq!(report.metric("OccupancyThreshold").unwrap(), vec![30.0, 20.0]);
}

#[test]
fn weekly_dwell_time_averages_cameras_then_days() {
    let dir = TempDir::new().unwrap();
    let engine = engine(&dir);
    let family = MetricFamily::DwellTime;
    let rows = [
        ("1", 14, [2.0, 100.0, 150.0, 0.0, 1.0, 1.0, 0.0, 0.0]),
        ("1", 15, [1.0, 300.0, 300.0, 0.0, 0.0, 0.0, 1.0, 0.0]),
        ("2", 14, [2.0, 50.0, 60.0, 1.0, 1.0, 0.0, 0.0, 0.0]),
    ];
    for (id, d, values) in rows {
        let camera = engine.entity(family, id).unwrap();
        let row = DailyRow {
            date: day(d),
            values: values.to_vec(),
        };
        engine.store().append_daily_row(camera, family, &row).unwrap();
    }

    // The 14th merges to an average of 75, the 15th stays at 300.
    let range = WeeklyRange::Rolling { number_of_weeks: 1 };
    let report = engine.weekly_report(family, &["1", "2"], range, day(21)).unwrap();
    assert_eq!(report.weeks[0].start, day(14));
    assert_eq!(report.metric("DetectedObjects").unwrap(), vec![5.0]);
    assert_eq!(report.metric("AvgDwellTime").unwrap(), vec![187.5]);
    assert_eq!(report.metric("MaxDwellTime").unwrap(), vec![300.0]);
    assert_eq!(report.metric("L2").unwrap(), vec![2.0]);
    assert_eq!(report.metric("L4").unwrap(), vec![1.0]);
}

#[test]
fn weekly_arguments_are_checked() {
    assert!(matches!(
        WeeklyRange::from_args(0, Some(day(20)), None),
        Err(TallyError::InvalidArgument(_))
    ));
    assert!(matches!(
        WeeklyRange::from_args(0, Some(day(20)), Some(day(10))),
        Err(TallyError::InvalidRange { .. })
    ));

    let dir = TempDir::new().unwrap();
    let engine = engine(&dir);
    let huge = WeeklyRange::Rolling {
        number_of_weeks: 20_000_000,
    };
    assert!(matches!(
        engine.weekly_report(MetricFamily::InOut, &["1"], huge, day(30)),
        Err(TallyError::InvalidArgument(_))
    ));
}

#[test]
fn scheduled_runs_cover_every_entity() {
    let dir = TempDir::new().unwrap();
    let engine = engine(&dir);
    let generator = GeneratorConfig::new(day(19))
        .with_start_hour(9)
        .with_num_samples(600)
        .with_seed(5);
    Scenario::Doorway { people: 8 }
        .generate(&generator)
        .unwrap()
        .install(dir.path(), "cameras", "1")
        .unwrap();
    Scenario::Queue { people: 4 }
        .generate(&generator)
        .unwrap()
        .install(dir.path(), "cameras", "2")
        .unwrap();
    Scenario::Lounge {
        visitors: 12,
        max_stay_samples: 400,
    }
    .generate(&generator)
    .unwrap()
    .install(dir.path(), "areas", "5")
    .unwrap();

    let runner = JobRunner::new(3);
    // Four camera families on two cameras, occupancy on one area.
    let hourly = runner.run(&engine, JobKind::Hourly, at(20, 0, 5));
    assert!(hourly.is_success());
    assert_eq!(hourly.succeeded, 9);

    for family in MetricFamily::ALL {
        for entity in engine.entities(family) {
            let rows = engine.store().hourly_rows(entity, family, day(19)).unwrap().unwrap();
            assert_eq!(rows.len(), 24);
        }
    }

    let daily = runner.run(&engine, JobKind::Daily, at(20, 0, 10));
    assert_eq!(daily.succeeded, 9);
    let report = engine
        .daily_report(MetricFamily::InOut, &["1"], day(19), day(19))
        .unwrap();
    assert_eq!(report.metric("In").unwrap(), vec![4.0]);
    assert_eq!(report.metric("Out").unwrap(), vec![4.0]);

    // No face classifier, and camera 2 has no boundary.
    let live = runner.run(&engine, JobKind::Live, at(19, 11, 0));
    assert_eq!(live.succeeded, 6);
    assert_eq!(live.skipped, 3);
    assert_eq!(live.total(), 9);

    // Nothing logged for the 20th yet.
    let idle = runner.run(&engine, JobKind::Hourly, at(20, 3, 0));
    assert!(idle.is_success());
    assert_eq!(idle.skipped, 9);
}
