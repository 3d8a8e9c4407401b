use noesis::{Agent, AgentConfig, RunUnit};

fn agent() -> Agent {
    Agent::new("e2e", AgentConfig::default().with_seed(11))
}

fn agent_with(config: AgentConfig) -> Agent {
    Agent::new("e2e", config)
}

#[test]
fn single_elaboration_materializes_rhs_wme_exactly_once() {
    // Load `(state <s> ^foo 1) --> (<s> ^bar 2)`, add `(S1 ^foo 1)`,
    // run one elaboration: `(S1 ^bar 2)` is present exactly once.
    let mut a = agent();
    a.load_productions("sp {ab (state <s> ^foo 1) --> (<s> ^bar 2)}")
        .unwrap();

    let top = a.top_state();
    let foo = a.str_sym("foo");
    let one = a.int_sym(1);
    a.create_wme(&top, foo, one, false).unwrap();
    a.commit();

    a.run(1, RunUnit::Elaboration);

    let bars: Vec<_> = a
        .wmes_of(&top)
        .into_iter()
        .filter(|w| w.attr.as_str() == Some("bar"))
        .collect();
    assert_eq!(bars.len(), 1);
    assert_eq!(bars[0].value.as_int(), Some(2));
}

#[test]
fn two_acceptable_operators_tie_and_deepen_the_stack() {
    let mut a = agent();
    a.load_productions(
        "sp {propose-one (state <s> ^superstate nil) --> (<s> ^operator <o> +) (<o> ^name one)}\n\
         sp {propose-two (state <s> ^superstate nil) --> (<s> ^operator <o> +) (<o> ^name two)}",
    )
    .unwrap();

    let depth_before = a.goal_stack().len();
    assert_eq!(depth_before, 1);

    a.run(1, RunUnit::Decision);

    let stack = a.goal_stack();
    assert_eq!(stack.len(), 2);

    // The sub-goal carries the tie description and both candidates.
    let subgoal = &stack[1];
    let wmes = a.wmes_of(subgoal);
    let impasse = wmes
        .iter()
        .find(|w| w.attr.as_str() == Some("impasse"))
        .expect("impasse attribute");
    assert_eq!(impasse.value.as_str(), Some("tie"));
    let items = wmes
        .iter()
        .filter(|w| w.attr.as_str() == Some("item"))
        .count();
    assert_eq!(items, 2);
}

#[test]
fn best_preference_selects_operator() {
    let mut a = agent();
    a.load_productions(
        "sp {propose-slow (state <s> ^superstate nil) --> (<s> ^operator <o> +) (<o> ^name slow)}\n\
         sp {propose-fast (state <s> ^superstate nil) --> (<s> ^operator <o> + ^operator <o> >) (<o> ^name fast)}",
    )
    .unwrap();

    a.run(1, RunUnit::Decision);

    let top = a.top_state();
    let selected = a.selected_operator(&top).expect("an operator is selected");
    let name = a
        .wmes_of(&selected)
        .into_iter()
        .find(|w| w.attr.as_str() == Some("name"))
        .expect("operator name");
    assert_eq!(name.value.as_str(), Some("fast"));
    assert_eq!(a.goal_stack().len(), 1);
}

#[test]
fn better_cycle_produces_conflict_impasse() {
    let mut a = agent();
    a.load_productions(
        "sp {propose (state <s> ^superstate nil) --> (<s> ^operator <a> + ^operator <b> +) (<a> ^name left) (<b> ^name right)}\n\
         sp {left-better (state <s> ^operator <a> + ^operator <b> +) (<a> ^name left) (<b> ^name right) --> (<s> ^operator <a> > <b>)}\n\
         sp {right-better (state <s> ^operator <a> + ^operator <b> +) (<a> ^name left) (<b> ^name right) --> (<s> ^operator <b> > <a>)}",
    )
    .unwrap();

    a.run(2, RunUnit::Decision);

    let stack = a.goal_stack();
    assert!(stack.len() >= 2);
    let subgoal = &stack[1];
    let impasse = a
        .wmes_of(subgoal)
        .into_iter()
        .find(|w| w.attr.as_str() == Some("impasse"))
        .expect("impasse attribute");
    assert_eq!(impasse.value.as_str(), Some("conflict"));
}

#[test]
fn quiescence_pushes_state_no_change() {
    let mut a = agent();
    a.run(1, RunUnit::Decision);
    let stack = a.goal_stack();
    assert_eq!(stack.len(), 2);
    let wmes = a.wmes_of(&stack[1]);
    let impasse = wmes
        .iter()
        .find(|w| w.attr.as_str() == Some("impasse"))
        .unwrap();
    assert_eq!(impasse.value.as_str(), Some("no-change"));
    let attribute = wmes
        .iter()
        .find(|w| w.attr.as_str() == Some("attribute"))
        .unwrap();
    assert_eq!(attribute.value.as_str(), Some("state"));
}

#[test]
fn max_elaborations_bounds_a_refiring_loop_and_decision_still_runs() {
    // A production that keeps generating fresh `^tick` values would
    // elaborate forever; the bound forces the decision phase after
    // exactly three elaboration cycles.
    let mut a = agent_with(
        AgentConfig::default()
            .with_seed(5)
            .with_max_elaborations(3),
    );
    a.load_productions("sp {spin (state <s> ^tick <t>) --> (<s> ^tick (gensym t))}")
        .unwrap();

    let top = a.top_state();
    let tick = a.str_sym("tick");
    let seed = a.str_sym("t0");
    a.create_wme(&top, tick, seed, false).unwrap();
    a.commit();

    a.run(1, RunUnit::Decision);

    assert_eq!(a.stats().elaboration_cycles, 3);
    assert_eq!(a.stats().decision_cycles, 1);
    let ticks = a
        .wmes_of(&top)
        .into_iter()
        .filter(|w| w.attr.as_str() == Some("tick"))
        .count();
    // The seed plus one per elaboration.
    assert_eq!(ticks, 4);
}

#[test]
fn excise_retracts_all_live_instantiations_and_their_wmes() {
    let mut a = agent();
    a.load_productions("sp {bulk (state <s> ^item <i>) --> (<s> ^seen <i>)}")
        .unwrap();

    let top = a.top_state();
    let item = a.str_sym("item");
    for n in 0..5 {
        let v = a.int_sym(n);
        a.create_wme(&top, item.clone(), v, false).unwrap();
    }
    a.commit();
    a.run(1, RunUnit::Elaboration);

    let seen = a
        .wmes_of(&top)
        .into_iter()
        .filter(|w| w.attr.as_str() == Some("seen"))
        .count();
    assert_eq!(seen, 5);

    let retracted = a.excise_production("bulk").unwrap();
    assert_eq!(retracted, 5);

    // The i-supported results are gone before excise returned.
    let seen = a
        .wmes_of(&top)
        .into_iter()
        .filter(|w| w.attr.as_str() == Some("seen"))
        .count();
    assert_eq!(seen, 0);
}

#[test]
fn o_supported_wme_survives_instantiation_retraction() {
    let mut a = agent();
    a.load_productions(
        "sp {propose (state <s> ^go t) --> (<s> ^operator <o> +) (<o> ^name mark)}\n\
         sp {apply (state <s> ^operator <o>) (<o> ^name mark) --> (<s> ^marked t)}",
    )
    .unwrap();

    let top = a.top_state();
    let go = a.str_sym("go");
    let t = a.str_sym("t");
    let go_wme = a.create_wme(&top, go, t, false).unwrap();
    a.commit();

    a.run(2, RunUnit::Decision);
    let wmes = a.wmes_of(&top);
    assert!(wmes.iter().any(|w| w.attr.as_str() == Some("marked")));

    // Pull the proposal's support: the proposal and application both
    // retract, the operator is deselected, but the o-supported
    // `^marked t` persists.
    a.destroy_wme(go_wme.timetag).unwrap();
    a.commit();
    a.run(2, RunUnit::Decision);

    let wmes = a.wmes_of(&top);
    assert!(a.selected_operator(&top).is_none());
    assert!(wmes.iter().any(|w| w.attr.as_str() == Some("marked")));
}

#[test]
fn gds_invalidates_subgoal_built_on_removed_wme() {
    let mut a = agent();
    a.load_productions(
        "sp {sub-propose (state <s> ^impasse no-change ^superstate <ss>) (<ss> ^flag on) --> (<s> ^operator <o> +) (<o> ^name work)}\n\
         sp {sub-apply (state <s> ^operator <o>) (<o> ^name work) (<s> ^superstate <ss>) (<ss> ^flag on) --> (<s> ^progress t)}",
    )
    .unwrap();

    let top = a.top_state();
    let flag = a.str_sym("flag");
    let on = a.str_sym("on");
    let flag_wme = a.create_wme(&top, flag, on, false).unwrap();
    a.commit();

    a.run(3, RunUnit::Decision);
    assert!(a.goal_stack().len() >= 2);

    // Remove the higher-level WME the sub-goal's o-supported progress
    // depended on: the dependency check removes the sub-goal.
    a.destroy_wme(flag_wme.timetag).unwrap();
    a.commit();
    assert_eq!(a.goal_stack().len(), 1);
}

#[test]
fn deterministic_under_fixed_seed() {
    let build = || {
        let mut a = agent_with(AgentConfig::default().with_seed(99));
        a.load_productions(
            "sp {p1 (state <s> ^superstate nil) --> (<s> ^operator <o> + ^operator <o> =) (<o> ^name alpha)}\n\
             sp {p2 (state <s> ^superstate nil) --> (<s> ^operator <o> + ^operator <o> =) (<o> ^name beta)}",
        )
        .unwrap();
        a.run(2, RunUnit::Decision);
        let top = a.top_state();
        let op = a.selected_operator(&top).expect("indifferent choice");
        a.wmes_of(&op)
            .into_iter()
            .find(|w| w.attr.as_str() == Some("name"))
            .and_then(|w| w.value.as_str().map(str::to_string))
    };
    assert_eq!(build(), build());
}
