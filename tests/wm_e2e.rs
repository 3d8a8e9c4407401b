use noesis::{Agent, AgentConfig, RunUnit, TraceEvent, WmError};

fn agent() -> Agent {
    Agent::new("wm", AgentConfig::default().with_seed(2))
}

#[test]
fn add_then_remove_before_commit_is_invisible_to_matching() {
    let mut a = agent();
    a.load_productions("sp {watch (state <s> ^ephemeral t) --> (<s> ^saw t)}")
        .unwrap();

    let trace = a.subscribe_trace();

    let top = a.top_state();
    let attr = a.str_sym("ephemeral");
    let t = a.str_sym("t");
    let wme = a.create_wme(&top, attr, t, false).unwrap();
    a.destroy_wme(wme.timetag).unwrap();
    a.commit();

    a.run(1, RunUnit::Decision);

    // Zero match-network activity for the production: it never fired,
    // and the WME never even reached the trace as an addition.
    assert_eq!(a.firing_count("watch"), 0);
    let records = trace.drain();
    assert!(!records.iter().any(|r| matches!(
        &r.event,
        TraceEvent::WmeAdded { timetag, .. } if *timetag == wme.timetag
    )));
    assert!(!records.iter().any(|r| matches!(
        &r.event,
        TraceEvent::ProductionFired { production, .. } if production == "watch"
    )));
}

#[test]
fn double_destroy_reports_not_found_without_corruption() {
    let mut a = agent();
    a.load_productions("sp {watch (state <s> ^thing <x>) --> (<s> ^echo <x>)}")
        .unwrap();

    let top = a.top_state();
    let thing = a.str_sym("thing");
    let keep = a.int_sym(1);
    let drop = a.int_sym(2);
    let keep_wme = a.create_wme(&top, thing.clone(), keep, false).unwrap();
    let drop_wme = a.create_wme(&top, thing, drop, false).unwrap();
    a.commit();
    a.run(1, RunUnit::Elaboration);
    assert_eq!(a.match_count("watch"), 2);

    a.destroy_wme(drop_wme.timetag).unwrap();
    let err = a.destroy_wme(drop_wme.timetag).unwrap_err();
    assert!(matches!(err, WmError::NotFound { .. }));
    a.commit();
    a.run(1, RunUnit::Elaboration);

    // The failed second removal corrupted nothing: the surviving match
    // is intact.
    assert_eq!(a.match_count("watch"), 1);
    assert!(a
        .wmes_of(&top)
        .iter()
        .any(|w| w.timetag == keep_wme.timetag));
}

#[test]
fn commit_batches_a_whole_phase_of_changes() {
    // Several additions inside one batch reach the network together: a
    // two-condition production sees a consistent snapshot and fires
    // once, not per-delta.
    let mut a = agent();
    a.load_productions("sp {pair (state <s> ^left <l> ^right <r>) --> (<s> ^both t)}")
        .unwrap();

    let top = a.top_state();
    let left = a.str_sym("left");
    let right = a.str_sym("right");
    let one = a.int_sym(1);
    let two = a.int_sym(2);
    a.create_wme(&top, left, one, false).unwrap();
    a.create_wme(&top, right, two, false).unwrap();
    a.commit();
    a.run(1, RunUnit::Elaboration);

    assert_eq!(a.firing_count("pair"), 1);
    assert_eq!(a.match_count("pair"), 1);
}

#[test]
fn cyclic_structures_are_legal_and_matchable() {
    let mut a = agent();
    a.load_productions(
        "sp {cycle (state <s> ^ring <a>) (<a> ^next <b>) (<b> ^next <a>) --> (<s> ^ring-found t)}",
    )
    .unwrap();

    let top = a.top_state();

    // The ring is built by a production whose unbound RHS variables
    // mint fresh identifiers pointing at each other.
    a.load_productions(
        "sp {build (state <s> ^superstate nil) --> (<s> ^ring <a>) (<a> ^next <b>) (<b> ^next <a>)}",
    )
    .unwrap();
    a.run(2, RunUnit::Elaboration);

    assert_eq!(a.firing_count("cycle"), 1);
    assert!(a
        .wmes_of(&top)
        .iter()
        .any(|w| w.attr.as_str() == Some("ring-found")));
}

#[test]
fn incremental_updates_equal_fresh_agent_on_same_final_state() {
    let rule = "sp {scan (state <s> ^kind <k> ^val <k>) --> (<s> ^hit <k>)}";

    // Agent one takes a churny path: adds, removals, re-adds.
    let mut churny = agent();
    churny.load_productions(rule).unwrap();
    let top = churny.top_state();
    let kind = churny.str_sym("kind");
    let val = churny.str_sym("val");
    let mut tags = Vec::new();
    for n in 0..4 {
        let v = churny.int_sym(n);
        tags.push(churny.create_wme(&top, kind.clone(), v, false).unwrap().timetag);
    }
    churny.commit();
    churny.run(1, RunUnit::Elaboration);
    churny.destroy_wme(tags[0]).unwrap();
    churny.destroy_wme(tags[1]).unwrap();
    let two = churny.int_sym(2);
    let three = churny.int_sym(3);
    churny.create_wme(&top, val.clone(), two, false).unwrap();
    churny.commit();
    churny.run(1, RunUnit::Elaboration);
    churny.create_wme(&top, val, three, false).unwrap();
    churny.commit();
    churny.run(1, RunUnit::Elaboration);

    // Agent two receives only the surviving facts, in one batch:
    // kinds {2, 3} and vals {2, 3}.
    let mut fresh = agent();
    fresh.load_productions(rule).unwrap();
    let ftop = fresh.top_state();
    let fkind = fresh.str_sym("kind");
    let fval = fresh.str_sym("val");
    for n in [2i64, 3] {
        let v = fresh.int_sym(n);
        fresh.create_wme(&ftop, fkind.clone(), v, false).unwrap();
    }
    for n in [2i64, 3] {
        let v = fresh.int_sym(n);
        fresh.create_wme(&ftop, fval.clone(), v, false).unwrap();
    }
    fresh.commit();
    fresh.run(1, RunUnit::Elaboration);

    assert_eq!(churny.match_count("scan"), fresh.match_count("scan"));
    assert_eq!(churny.match_count("scan"), 2);
}
