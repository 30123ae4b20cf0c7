mod common;

use assert_matches::assert_matches;

use malq::domain::{EntryId, NO_RATING};
use malq::error::MalqError;
use malq::progress::{SilentSink, Snapshot};
use malq::store::CacheStore;

use common::{MockCatalog, RecordingSink, cache_path, entry, record, unrated};

#[test]
fn duplicate_add_leaves_collection_unchanged() {
    let temp = tempfile::tempdir().unwrap();
    let mut store = CacheStore::new(cache_path(&temp));

    store.add_unique(unrated(5)).unwrap();
    let err = store.add_unique(entry(5, true, 9.0)).unwrap_err();

    assert_matches!(err, MalqError::DuplicateEntry { id, .. } if id == EntryId::new(5));
    assert_eq!(store.len(), 1);
    assert_eq!(store.entries()[0], unrated(5));
}

#[test]
fn remove_takes_exactly_one() {
    let temp = tempfile::tempdir().unwrap();
    let mut store = CacheStore::new(cache_path(&temp));
    store.add_unique(unrated(1)).unwrap();
    store.add_unique(unrated(2)).unwrap();

    let removed = store.remove(EntryId::new(1)).unwrap();
    assert_eq!(removed.id, EntryId::new(1));
    assert_eq!(store.len(), 1);
    assert!(!store.contains(EntryId::new(1)));
    assert!(store.contains(EntryId::new(2)));
    assert_matches!(store.remove(EntryId::new(1)), Err(MalqError::NotTracked(_)));
}

#[test]
fn save_then_load_round_trips() {
    let temp = tempfile::tempdir().unwrap();
    let path = cache_path(&temp);
    let mut store = CacheStore::new(path.clone());
    let mut tagged = entry(3, true, 8.25);
    tagged.start_period = Some("spring 2004".to_string());
    tagged.tags = vec!["Drama".to_string(), "Mystery".to_string()];
    tagged.related_entries = vec![malq::domain::RelatedEntry {
        entry: unrated(4),
        relation_kind: "Sequel".to_string(),
    }];
    store.add_unique(tagged.clone()).unwrap();
    store.add_unique(unrated(9)).unwrap();
    store.save().unwrap();

    let loaded = CacheStore::load(path).unwrap();
    assert_eq!(loaded.len(), 2);
    assert_eq!(loaded.entries()[0], tagged.without_related());
    assert_eq!(loaded.entries()[1], unrated(9));
}

#[test]
fn refresh_skips_complete_entries() {
    let temp = tempfile::tempdir().unwrap();
    let mut store = CacheStore::new(cache_path(&temp));
    let finished = entry(1, true, 7.0);
    store.add_unique(finished.clone()).unwrap();
    store.add_unique(unrated(2)).unwrap();

    let catalog = MockCatalog::with_records([
        record(1, "finished_airing", Some(1.0)),
        record(2, "currently_airing", Some(6.0)),
    ]);
    let report = store.refresh(&catalog, false, &SilentSink, "").unwrap();

    assert_eq!(report.eligible, 1);
    assert_eq!(report.fetched, 1);
    assert_eq!(catalog.fetched_ids(), vec![2]);
    assert_eq!(store.get(EntryId::new(1)), Some(&finished));
}

#[test]
fn forced_refresh_fetches_everything() {
    let temp = tempfile::tempdir().unwrap();
    let mut store = CacheStore::new(cache_path(&temp));
    store.add_unique(entry(1, true, 7.0)).unwrap();
    store.add_unique(unrated(2)).unwrap();

    let catalog = MockCatalog::with_records([
        record(1, "finished_airing", Some(7.5)),
        record(2, "currently_airing", None),
    ]);
    store.refresh(&catalog, true, &SilentSink, "").unwrap();

    assert_eq!(catalog.fetched_ids(), vec![1, 2]);
    assert_eq!(store.get(EntryId::new(1)).unwrap().rating, 7.5);
}

#[test]
fn refresh_sorts_stably_with_unrated_last() {
    let temp = tempfile::tempdir().unwrap();
    let mut store = CacheStore::new(cache_path(&temp));
    for item in [
        entry(1, true, 6.0),
        unrated(2),
        entry(3, true, 8.0),
        entry(4, true, 6.0),
        entry(5, true, 0.0),
        entry(6, true, 8.0),
    ] {
        store.add_unique(item).unwrap();
    }

    let catalog = MockCatalog::with_records([record(2, "currently_airing", None)]);
    store.refresh(&catalog, false, &SilentSink, "").unwrap();

    let ids: Vec<u64> = store.entries().iter().map(|e| e.id.get()).collect();
    assert_eq!(ids, vec![3, 6, 1, 4, 5, 2]);
    let ratings: Vec<f64> = store.entries().iter().map(|e| e.rating).collect();
    assert!(ratings.windows(2).all(|pair| pair[0] >= pair[1]));
    assert_eq!(*ratings.last().unwrap(), NO_RATING);
}

#[test]
fn refresh_until_complete_then_no_more_fetches() {
    let temp = tempfile::tempdir().unwrap();
    let mut store = CacheStore::new(cache_path(&temp));
    store.add_unique(unrated(1)).unwrap();

    let catalog = MockCatalog::with_records([record(1, "finished_airing", Some(7.5))]);
    store.refresh(&catalog, false, &SilentSink, "").unwrap();

    assert_eq!(catalog.fetched_ids(), vec![1]);
    let refreshed = &store.entries()[0];
    assert!(refreshed.is_complete);
    assert_eq!(refreshed.rating, 7.5);
    assert_eq!(refreshed.name, "Show 1");
    assert_eq!(refreshed.length, Some(12));

    let report = store.refresh(&catalog, false, &SilentSink, "").unwrap();
    assert_eq!(report.eligible, 0);
    assert_eq!(catalog.fetched_ids(), vec![1]);
}

#[test]
fn failed_fetch_keeps_entry_and_aborts() {
    let temp = tempfile::tempdir().unwrap();
    let mut store = CacheStore::new(cache_path(&temp));
    store.add_unique(unrated(1)).unwrap();
    store.add_unique(unrated(2)).unwrap();
    store.add_unique(unrated(3)).unwrap();

    let catalog = MockCatalog::with_records([
        record(1, "currently_airing", Some(5.0)),
        record(3, "currently_airing", Some(9.0)),
    ])
    .failing_on(2);
    let sink = RecordingSink::default();
    let err = store.refresh(&catalog, false, &sink, "").unwrap_err();

    assert!(err.is_transport());
    assert_eq!(catalog.fetched_ids(), vec![1, 2]);
    assert_eq!(store.len(), 3);
    assert_eq!(store.get(EntryId::new(2)), Some(&unrated(2)));
    assert_eq!(store.get(EntryId::new(1)).unwrap().rating, 5.0);
    // The session still ends with the done flag.
    assert!(sink.snapshots().last().unwrap().done);
}

#[test]
fn refresh_progress_counts_only_eligible_entries() {
    let temp = tempfile::tempdir().unwrap();
    let mut store = CacheStore::new(cache_path(&temp));
    store.add_unique(entry(1, true, 7.0)).unwrap();
    store.add_unique(unrated(2)).unwrap();
    store.add_unique(unrated(3)).unwrap();

    let catalog = MockCatalog::with_records([
        record(2, "currently_airing", None),
        record(3, "currently_airing", None),
    ]);
    let sink = RecordingSink::default();
    store.refresh(&catalog, false, &sink, "Refreshing ").unwrap();

    assert_eq!(
        *sink.opened.lock().unwrap(),
        vec![("Refreshing ".to_string(), 2)]
    );
    let snapshots = sink.snapshots();
    let completed: Vec<u64> = snapshots.iter().map(|s| s.completed).collect();
    assert_eq!(completed, vec![0, 1, 2, 2]);
    assert_eq!(
        *snapshots.last().unwrap(),
        Snapshot {
            completed: 2,
            total: 2,
            done: true
        }
    );
    assert_eq!(snapshots.iter().filter(|s| s.done).count(), 1);
}

#[test]
fn load_drops_duplicate_ids() {
    let temp = tempfile::tempdir().unwrap();
    let path = cache_path(&temp);

    // Rewrite the saved payload with its only entry listed twice.
    let mut first = CacheStore::new(path.clone());
    first.add_unique(entry(1, true, 7.0)).unwrap();
    first.save().unwrap();
    let raw = std::fs::read(path.as_std_path()).unwrap();
    let mut decoder = flate2::read::GzDecoder::new(raw.as_slice());
    let mut json = String::new();
    std::io::Read::read_to_string(&mut decoder, &mut json).unwrap();
    let mut value: serde_json::Value = serde_json::from_str(&json).unwrap();
    let duplicate = value["entries"][0].clone();
    value["entries"].as_array_mut().unwrap().push(duplicate);

    let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    std::io::Write::write_all(&mut encoder, value.to_string().as_bytes()).unwrap();
    std::fs::write(path.as_std_path(), encoder.finish().unwrap()).unwrap();

    let loaded = CacheStore::load(path).unwrap();
    assert_eq!(loaded.len(), 1);
}

#[test]
fn corrupt_cache_is_an_error() {
    let temp = tempfile::tempdir().unwrap();
    let path = cache_path(&temp);
    std::fs::write(path.as_std_path(), b"not gzip").unwrap();
    assert_matches!(CacheStore::load(path), Err(MalqError::Filesystem(_)));
}
