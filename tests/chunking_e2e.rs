use noesis::{Agent, AgentConfig, ProductionKind, RunUnit};

const SOLVE: &str = "sp {solve (state <s> ^impasse no-change ^superstate <ss>) (<ss> ^value <v>) --> (<ss> ^answer <v>)}";

fn learning_agent() -> Agent {
    Agent::new("learner", AgentConfig::default().with_seed(4).with_learning())
}

fn seed_value(a: &mut Agent, v: i64) {
    let top = a.top_state();
    let value = a.str_sym("value");
    let n = a.int_sym(v);
    a.create_wme(&top, value, n, false).unwrap();
    a.commit();
}

fn answer_of(a: &Agent) -> Option<i64> {
    let top = a.top_state();
    a.wmes_of(&top)
        .into_iter()
        .find(|w| w.attr.as_str() == Some("answer"))
        .and_then(|w| w.value.as_int())
}

#[test]
fn resolving_a_subgoal_builds_a_chunk() {
    let mut a = learning_agent();
    a.load_productions(SOLVE).unwrap();
    seed_value(&mut a, 5);

    a.run(2, RunUnit::Decision);

    assert_eq!(answer_of(&a), Some(5));
    assert_eq!(a.stats().chunks_built, 1);
    let chunk_name = a
        .production_names()
        .into_iter()
        .find(|n| n.starts_with("chunk-"))
        .expect("a chunk was installed");
    let chunk = a.production(&chunk_name).unwrap();
    assert_eq!(chunk.kind, ProductionKind::Chunk);
    // The chunk's conditions are the grounds: the higher-level value
    // WME, not the sub-goal architecture.
    assert_eq!(chunk.conditions.len(), 1);
}

#[test]
fn chunk_replaces_the_subgoal_path_with_identical_results() {
    let mut a = learning_agent();
    a.load_productions(SOLVE).unwrap();
    seed_value(&mut a, 5);
    a.run(2, RunUnit::Decision);
    let via_subgoal = answer_of(&a).expect("sub-goal path produced an answer");

    // Re-pose the problem: the chunk answers in a single elaboration,
    // before any impasse can arise.
    a.init();
    seed_value(&mut a, 5);
    a.run(1, RunUnit::Elaboration);

    assert_eq!(answer_of(&a), Some(via_subgoal));
    assert_eq!(a.goal_stack().len(), 1);
}

#[test]
fn duplicate_chunk_is_silently_rejected() {
    let mut a = learning_agent();
    a.load_productions(SOLVE).unwrap();
    seed_value(&mut a, 5);
    a.run(2, RunUnit::Decision);
    assert_eq!(a.stats().chunks_built, 1);

    // Solve the same problem again from scratch: the backtrace yields
    // an identical rule, which is dropped, not duplicated.
    a.init();
    seed_value(&mut a, 5);
    a.run(3, RunUnit::Decision);

    assert_eq!(a.stats().chunks_built, 1);
    let chunks = a
        .production_names()
        .into_iter()
        .filter(|n| n.starts_with("chunk-"))
        .count();
    assert_eq!(chunks, 1);
}

#[test]
fn learning_off_builds_a_justification_instead() {
    let mut a = Agent::new("cautious", AgentConfig::default().with_seed(4));
    a.load_productions(SOLVE).unwrap();
    seed_value(&mut a, 9);

    a.run(2, RunUnit::Decision);

    assert_eq!(answer_of(&a), Some(9));
    assert_eq!(a.stats().chunks_built, 0);
    assert!(a.stats().justifications_built >= 1);
    let justification = a
        .production_names()
        .into_iter()
        .find(|n| n.starts_with("justification-"))
        .expect("a justification was installed");
    assert_eq!(
        a.production(&justification).unwrap().kind,
        ProductionKind::Justification
    );
}

#[test]
fn chunk_generalizes_over_identifiers_not_constants() {
    let mut a = learning_agent();
    a.load_productions(SOLVE).unwrap();
    seed_value(&mut a, 5);
    a.run(2, RunUnit::Decision);

    // The learned rule variablized the state identifier but kept the
    // tested constant, so a different value does not match it.
    a.init();
    seed_value(&mut a, 7);
    a.run(1, RunUnit::Elaboration);
    assert_eq!(answer_of(&a), None);

    // The sub-goal path still solves it.
    a.run(2, RunUnit::Decision);
    assert_eq!(answer_of(&a), Some(7));
}

#[test]
fn max_chunks_bounds_learning_per_cycle() {
    let mut a = Agent::new(
        "bounded",
        AgentConfig {
            max_chunks: 1,
            ..AgentConfig::default().with_seed(4).with_learning()
        },
    );
    // Two independent results from the same sub-goal, each triggering
    // a build; only one fits under the bound.
    a.load_productions(
        "sp {solve-a (state <s> ^impasse no-change ^superstate <ss>) (<ss> ^value <v>) --> (<ss> ^answer-a <v>)}\n\
         sp {solve-b (state <s> ^impasse no-change ^superstate <ss>) (<ss> ^value <v>) --> (<ss> ^answer-b <v>)}",
    )
    .unwrap();
    seed_value(&mut a, 1);

    a.run(2, RunUnit::Decision);

    assert_eq!(a.stats().chunks_built, 1);
}
