//! End-to-end protocol sessions over the local simulator.

use plpsi::{simulate, PirMode, ProtocolConfig};

fn config(seed: u8) -> ProtocolConfig {
    let mut config = ProtocolConfig::default();
    config.rng_seed = Some([seed; 32]);
    config
}

fn pairs(keys: &[&str], values: &[&str]) -> Vec<(Vec<u8>, Vec<u8>)> {
    keys.iter()
        .zip(values.iter())
        .map(|(k, v)| (k.as_bytes().to_vec(), v.as_bytes().to_vec()))
        .collect()
}

fn queries(keys: &[&str]) -> Vec<Vec<u8>> {
    keys.iter().map(|k| k.as_bytes().to_vec()).collect()
}

#[test]
fn single_overlap_is_recovered_with_its_label() {
    let sender_db = pairs(&["alice", "bob", "carol"], &["111", "222", "333"]);
    let report = simulate(&sender_db, &queries(&["bob"]), &config(1)).unwrap();

    assert_eq!(
        report.intersection,
        vec![(b"bob".to_vec(), b"222".to_vec())]
    );
    assert_eq!(report.sender_intersection_size, 1);
}

#[test]
fn three_way_overlap_with_one_byte_labels() {
    let keys: Vec<String> = (0..16).map(|i| format!("k{i}")).collect();
    let sender_db: Vec<(Vec<u8>, Vec<u8>)> = keys
        .iter()
        .enumerate()
        .map(|(i, k)| (k.as_bytes().to_vec(), vec![i as u8]))
        .collect();
    let receiver_set = queries(&["k0", "k7", "k15"]);

    let report = simulate(&sender_db, &receiver_set, &config(2)).unwrap();

    let mut intersection = report.intersection.clone();
    intersection.sort();
    assert_eq!(
        intersection,
        vec![
            (b"k0".to_vec(), vec![0u8]),
            (b"k15".to_vec(), vec![15u8]),
            (b"k7".to_vec(), vec![7u8]),
        ]
    );
    assert_eq!(report.sender_intersection_size, 3);
}

#[test]
fn disjoint_inputs_short_circuit_the_ot_phase() {
    let sender_db = pairs(&["k0"], &["v0"]);
    let report = simulate(&sender_db, &queries(&["not_present"]), &config(3)).unwrap();

    assert!(report.intersection.is_empty());
    assert_eq!(report.sender_intersection_size, 0);
    // The OT primitive was never entered.
    assert_eq!(report.timings.ot_online.as_nanos(), 0);
}

#[test]
fn large_disjoint_sets_with_zero_heavy_labels() {
    // Labels full of zero bytes exercise the 0 <-> 8888 sentinel on many slots.
    let sender_db: Vec<(Vec<u8>, Vec<u8>)> = (0..256)
        .map(|i: u32| {
            let mut label = vec![0u8; 16];
            label[0] = (i % 3) as u8;
            (format!("s{i}").into_bytes(), label)
        })
        .collect();
    let receiver_set: Vec<Vec<u8>> = (0..64).map(|i| format!("r{i}").into_bytes()).collect();

    let mut config = config(4);
    config.item_size = 64;
    let report = simulate(&sender_db, &receiver_set, &config).unwrap();

    assert!(report.intersection.is_empty());
    assert_eq!(report.sender_intersection_size, 0);
}

#[test]
fn dense_subset_in_direct_mode() {
    let sender_db: Vec<(Vec<u8>, Vec<u8>)> = (0..128)
        .map(|i: u32| {
            let mut label = vec![0u8; 12];
            label[..4].copy_from_slice(&i.to_be_bytes());
            (format!("item{i}").into_bytes(), label)
        })
        .collect();
    // Every query is present in the sender's database.
    let receiver_set: Vec<Vec<u8>> = (0..32).map(|i| format!("item{i}").into_bytes()).collect();

    let mut config = config(5);
    config.item_size = 64;
    config.pir_mode = PirMode::Direct;
    let report = simulate(&sender_db, &receiver_set, &config).unwrap();

    assert_eq!(report.intersection.len(), 32);
    assert_eq!(report.sender_intersection_size, 32);
    for (x, v) in &report.intersection {
        let key = String::from_utf8(x.clone()).unwrap();
        let i: u32 = key.strip_prefix("item").unwrap().parse().unwrap();
        assert_eq!(&v[..4], &i.to_be_bytes());
        assert_eq!(&v[4..], &[0u8; 8]);
    }
}

#[test]
fn direct_and_default_modes_agree() {
    let sender_db = pairs(
        &["ada", "grace", "alan", "edsger", "barbara"],
        &["1815", "1906", "1912", "1930", "1939"],
    );
    let receiver_set = queries(&["grace", "barbara", "nobody"]);

    let mut direct = config(6);
    direct.pir_mode = PirMode::Direct;
    let report_direct = simulate(&sender_db, &receiver_set, &direct).unwrap();
    let report_default = simulate(&sender_db, &receiver_set, &config(6)).unwrap();

    let mut a = report_direct.intersection.clone();
    let mut b = report_default.intersection.clone();
    a.sort();
    b.sort();
    assert_eq!(a, b);
    assert_eq!(
        a,
        pairs(&["barbara", "grace"], &["1939", "1906"])
    );
}

#[test]
fn communication_is_accounted_per_phase() {
    let sender_db = pairs(&["alice", "bob", "carol"], &["111", "222", "333"]);
    let report = simulate(&sender_db, &queries(&["bob", "alice"]), &config(7)).unwrap();

    // Two OPRF rounds of 33-byte compressed points over the 2 queries.
    assert_eq!(report.comm.oprf_bytes, 2 * 2 * 33);
    assert_eq!(report.comm.layout_bytes, 24);
    assert!(report.comm.pir_query_bytes > 0);
    assert!(report.comm.pir_response_bytes > 0);
    assert!(report.comm.ot_bytes > 8);
    assert_eq!(
        report.comm.total(),
        report.comm.oprf_bytes
            + report.comm.layout_bytes
            + report.comm.pir_query_bytes
            + report.comm.pir_response_bytes
            + report.comm.ot_bytes
    );
}

#[test]
fn empty_inputs_are_rejected_up_front() {
    let sender_db = pairs(&["a"], &["1"]);
    assert!(simulate(&sender_db, &[], &config(8)).is_err());
    assert!(simulate(&[], &queries(&["a"]), &config(8)).is_err());
}

#[test]
fn oversized_records_are_rejected_with_a_diagnostic() {
    let sender_db = vec![(vec![b'x'; 60], vec![b'y'; 60])]; // 120 bytes > 92 available
    let err = simulate(&sender_db, &queries(&["q"]), &config(9)).unwrap_err();
    match err {
        plpsi::Error::InputShape(detail) => assert!(detail.contains("record 0")),
        other => panic!("expected InputShape, got {other:?}"),
    }
}
