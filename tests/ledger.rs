use camino::Utf8PathBuf;

use kira_accession_store::ledger::{RunLedger, filter_unprocessed};

fn ledger_in(dir: &tempfile::TempDir) -> RunLedger {
    RunLedger::new(Utf8PathBuf::from_path_buf(dir.path().join("processed_ids")).unwrap())
}

fn ids(values: &[&str]) -> Vec<String> {
    values.iter().map(|value| value.to_string()).collect()
}

#[test]
fn empty_ledger_starts_fresh() {
    let dir = tempfile::tempdir().unwrap();
    let ledger = ledger_in(&dir);
    assert!(ledger.load_most_recent().unwrap().is_empty());
}

#[test]
fn save_unions_with_previous_snapshot_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let ledger = ledger_in(&dir);

    ledger.save(&ids(&["A1.1", "B2.3"])).unwrap();
    let snapshot = ledger.save(&ids(&["B2.3", "C3.1"])).unwrap();

    assert_eq!(snapshot.sequence, 2);
    assert_eq!(snapshot.carried_over, 2);
    assert_eq!(
        ledger.load_most_recent().unwrap(),
        ids(&["A1.1", "B2.3", "C3.1"])
    );
    assert_eq!(ledger.snapshots().unwrap().len(), 2);
}

#[test]
fn retention_keeps_newest_snapshots() {
    let dir = tempfile::tempdir().unwrap();
    let ledger = ledger_in(&dir);
    for batch in ["A1.1", "B1.1", "C1.1", "D1.1"] {
        ledger.save(&ids(&[batch])).unwrap();
    }

    let report = ledger.retain(2).unwrap();

    assert_eq!(report.removed.len(), 2);
    let remaining = ledger
        .snapshots()
        .unwrap()
        .into_iter()
        .map(|(sequence, _)| sequence)
        .collect::<Vec<_>>();
    assert_eq!(remaining, vec![4, 3]);
    assert_eq!(
        ledger.load_most_recent().unwrap(),
        ids(&["A1.1", "B1.1", "C1.1", "D1.1"])
    );
}

#[test]
fn unprocessed_candidates_keep_their_order() {
    let candidates = ids(&["C3.1", "A1.1", "D4.2", "B2.3", "E5.1"]);
    let processed = ids(&["A1.1", "B2.3"]);
    assert_eq!(
        filter_unprocessed(&candidates, &processed),
        ids(&["C3.1", "D4.2", "E5.1"])
    );
}
