//! Integration tests for cgbn-infer

use approx::assert_abs_diff_eq;
use cgbn_infer::*;
use ndarray::array;

/// A -> B -> C
fn chain() -> (BayesNet, Variable, Variable, Variable) {
    let a = Variable::boolean("A");
    let b = Variable::boolean("B");
    let c = Variable::boolean("C");
    let mut net = BayesNet::new();
    net.add_node(Cpt::prior(a.clone(), &[0.7, 0.3]).unwrap())
        .unwrap();
    net.add_node(
        Cpt::new(
            b.clone(),
            vec![a.clone()],
            array![[0.9, 0.1], [0.4, 0.6]].into_dyn(),
        )
        .unwrap(),
    )
    .unwrap();
    net.add_node(
        Cpt::new(
            c.clone(),
            vec![b.clone()],
            array![[0.8, 0.2], [0.3, 0.7]].into_dyn(),
        )
        .unwrap(),
    )
    .unwrap();
    (net, a, b, c)
}

/// A -> {B, C} -> D
fn diamond() -> (BayesNet, [Variable; 4]) {
    let a = Variable::boolean("A");
    let b = Variable::boolean("B");
    let c = Variable::boolean("C");
    let d = Variable::boolean("D");
    let mut net = BayesNet::new();
    net.add_node(Cpt::prior(a.clone(), &[0.6, 0.4]).unwrap())
        .unwrap();
    net.add_node(
        Cpt::new(
            b.clone(),
            vec![a.clone()],
            array![[0.7, 0.3], [0.2, 0.8]].into_dyn(),
        )
        .unwrap(),
    )
    .unwrap();
    net.add_node(
        Cpt::new(
            c.clone(),
            vec![a.clone()],
            array![[0.5, 0.5], [0.9, 0.1]].into_dyn(),
        )
        .unwrap(),
    )
    .unwrap();
    net.add_node(
        Cpt::new(
            d.clone(),
            vec![b.clone(), c.clone()],
            array![[[0.99, 0.01], [0.4, 0.6]], [[0.3, 0.7], [0.05, 0.95]]].into_dyn(),
        )
        .unwrap(),
    )
    .unwrap();
    (net, [a, b, c, d])
}

/// Every completion of `evidence` over the network's enumerable variables, with its probability.
fn enumerate(net: &BayesNet, evidence: &Evidence) -> Vec<(Evidence, f64)> {
    let latent: Vec<Variable> = net
        .variables()
        .into_iter()
        .filter(|v| !evidence.contains(v))
        .collect();
    let total: usize = latent.iter().map(Variable::size).product();
    (0..total)
        .map(|code| {
            let mut rest = code;
            let mut full = evidence.clone();
            for var in latent.iter().rev() {
                full.set(var, Value::Discrete(rest % var.size())).unwrap();
                rest /= var.size();
            }
            let p = net.log_probability(&full).unwrap().exp();
            (full, p)
        })
        .collect()
}

/// Brute-force `P(var = 1 | evidence)`.
fn brute_posterior(net: &BayesNet, var: &Variable, evidence: &Evidence) -> f64 {
    let worlds = enumerate(net, evidence);
    let total: f64 = worlds.iter().map(|(_, p)| p).sum();
    let hit: f64 = worlds
        .iter()
        .filter(|(w, _)| w.get(var) == Some(Value::Discrete(1)))
        .map(|(_, p)| p)
        .sum();
    hit / total
}

#[test]
fn test_chain_prior_marginal() {
    let (net, _, _, c) = chain();
    let ve = VarElim::new(&net, InferenceConfig::default());
    let result = ve
        .infer(&ve.make_query(&[c.clone()], &Evidence::new()).unwrap())
        .unwrap();

    // P(B=1) = 0.7*0.1 + 0.3*0.6, P(C=1) = 0.75*0.2 + 0.25*0.7
    assert_eq!(result.variables(), &[c]);
    assert_abs_diff_eq!(result.probability(1).unwrap(), 0.325, epsilon = 1e-12);
    assert_abs_diff_eq!(result.probability(0).unwrap(), 0.675, epsilon = 1e-12);
}

#[test]
fn test_chain_with_root_evidence() {
    let (net, a, b, c) = chain();
    let evidence = Evidence::new().with_label(&a, "true").unwrap();

    // the sliced family of B no longer mentions A
    let mut relevant = evidence.to_relevant();
    relevant.insert(b.id(), None);
    let factor = net.node_for(&b).unwrap().make_dense_factor(&relevant).unwrap();
    assert!(!factor.contains(&a));
    assert!(factor.is_evidenced());
    assert_abs_diff_eq!(factor.get_value(1).unwrap(), 0.6, epsilon = 1e-12);

    let ve = VarElim::new(&net, InferenceConfig::default());
    let result = ve
        .infer(&ve.make_query(&[c.clone()], &evidence).unwrap())
        .unwrap();
    assert_eq!(result.variables(), &[c]);
    assert_abs_diff_eq!(
        result.probability(1).unwrap(),
        0.4 * 0.2 + 0.6 * 0.7,
        epsilon = 1e-12
    );
}

#[test]
fn test_diamond_order_invariance() {
    let (net, [a, b, c, d]) = diamond();
    let expected = brute_posterior(&net, &d, &Evidence::new());

    let ve = VarElim::new(&net, InferenceConfig::default());
    for order in [
        vec![b.clone(), c.clone(), a.clone()],
        vec![c.clone(), b.clone(), a.clone()],
        vec![a.clone(), b.clone(), c.clone()],
    ] {
        let query = ve
            .make_query(&[d.clone()], &Evidence::new())
            .unwrap()
            .with_elimination_order(order)
            .unwrap();
        let p = ve.infer(&query).unwrap().probability(1).unwrap();
        assert_abs_diff_eq!(p, expected, epsilon = 1e-12);
    }

    for strategy in [
        EliminationStrategy::Topological,
        EliminationStrategy::MinDegree,
        EliminationStrategy::MinFill,
        EliminationStrategy::WeightedMinFill,
    ] {
        let ve = VarElim::new(&net, InferenceConfig::default().with_strategy(strategy));
        let query = ve.make_query(&[d.clone()], &Evidence::new()).unwrap();
        let p = ve.infer(&query).unwrap().probability(1).unwrap();
        assert_abs_diff_eq!(p, expected, epsilon = 1e-12);
    }
}

#[test]
fn test_joint_query_matches_enumeration() {
    let (net, [_, b, c, d]) = diamond();
    let evidence = Evidence::new().with_label(&d, "true").unwrap();
    let ve = VarElim::new(&net, InferenceConfig::default());
    let result = ve
        .infer(&ve.make_query(&[c.clone(), b.clone()], &evidence).unwrap())
        .unwrap();

    assert_eq!(result.variables(), &[c.clone(), b.clone()]);
    let worlds = enumerate(&net, &evidence);
    let total: f64 = worlds.iter().map(|(_, p)| p).sum();
    for vc in 0..2 {
        for vb in 0..2 {
            let mass: f64 = worlds
                .iter()
                .filter(|(w, _)| {
                    w.get(&c) == Some(Value::Discrete(vc)) && w.get(&b) == Some(Value::Discrete(vb))
                })
                .map(|(_, p)| p)
                .sum();
            assert_abs_diff_eq!(
                result.probability_of(&[vc, vb]).unwrap(),
                mass / total,
                epsilon = 1e-12
            );
        }
    }
    let pb = result.marginal(&b).unwrap();
    assert_abs_diff_eq!(pb[1], brute_posterior(&net, &b, &evidence), epsilon = 1e-12);
}

#[test]
fn test_log_likelihood_round_trip() {
    let (net, [a, _, c, d]) = diamond();
    let ve = VarElim::new(&net, InferenceConfig::default());

    let partial = Evidence::new()
        .with_label(&d, "true")
        .unwrap()
        .with_label(&c, "false")
        .unwrap();
    let expected: f64 = enumerate(&net, &partial).iter().map(|(_, p)| p).sum();
    assert_abs_diff_eq!(
        ve.log_likelihood(&partial).unwrap(),
        expected.ln(),
        epsilon = 1e-12
    );

    // a complete instantiation agrees with the chain-rule product
    let (full, _) = enumerate(&net, &partial.with_label(&a, "true").unwrap())
        .into_iter()
        .next()
        .unwrap();
    assert_abs_diff_eq!(
        ve.log_likelihood(&full).unwrap(),
        net.log_probability(&full).unwrap(),
        epsilon = 1e-12
    );
}

#[test]
fn test_requisite_query_reports_no_likelihood() {
    let (net, a, _, c) = chain();
    let evidence = Evidence::new().with_label(&c, "true").unwrap();

    let pruned = VarElim::new(&net, InferenceConfig::default());
    let result = pruned
        .infer(&pruned.make_query(&[a.clone()], &evidence).unwrap())
        .unwrap();
    assert!(result.log_likelihood().is_none());

    let full = VarElim::new(&net, InferenceConfig::default().with_pruning(false));
    let result = full
        .infer(&full.make_query(&[a], &evidence).unwrap())
        .unwrap();
    assert_abs_diff_eq!(
        result.log_likelihood().unwrap(),
        0.325f64.ln(),
        epsilon = 1e-12
    );
}

#[test]
fn test_pruning_does_not_change_posteriors() {
    let (net, [a, b, c, d]) = diamond();
    let pruned = VarElim::new(&net, InferenceConfig::default());
    let full = VarElim::new(&net, InferenceConfig::default().with_pruning(false));

    let cases = [
        (b.clone(), Evidence::new().with_label(&d, "true").unwrap()),
        (b.clone(), Evidence::new().with_label(&a, "false").unwrap()),
        (a.clone(), Evidence::new().with_label(&c, "true").unwrap()),
        (d.clone(), Evidence::new()),
    ];
    for (var, evidence) in cases {
        let p = pruned
            .infer(&pruned.make_query(&[var.clone()], &evidence).unwrap())
            .unwrap();
        let q = full
            .infer(&full.make_query(&[var.clone()], &evidence).unwrap())
            .unwrap();
        assert_abs_diff_eq!(
            p.probability(1).unwrap(),
            q.probability(1).unwrap(),
            epsilon = 1e-12
        );
    }

    // B given A does not need C or D
    let q = pruned
        .make_query(&[b.clone()], &Evidence::new().with_label(&a, "false").unwrap())
        .unwrap();
    let nodes: Vec<&str> = q.nodes().iter().map(|&i| net.nodes()[i].name()).collect();
    assert!(!nodes.contains(&"D"));
    assert!(!nodes.contains(&"C"));
}

#[test]
fn test_unset_rows_agree_with_and_without_pruning() {
    let a = Variable::boolean("A");
    let b = Variable::boolean("B");
    let mut net = BayesNet::new();
    net.add_node(Cpt::prior(a.clone(), &[0.7, 0.3]).unwrap())
        .unwrap();
    net.add_node(
        Cpt::new(
            b.clone(),
            vec![a.clone()],
            array![[0.9, 0.1], [0.0, 0.0]].into_dyn(),
        )
        .unwrap(),
    )
    .unwrap();

    let pruned = VarElim::new(&net, InferenceConfig::default());
    let full = VarElim::new(&net, InferenceConfig::default().with_pruning(false));
    let observed_b = Evidence::new().with_label(&b, "true").unwrap();

    // (query, evidence, P(query = 1))
    let cases = [
        (a.clone(), Evidence::new(), 0.3),
        (b.clone(), Evidence::new(), 0.07 + 0.15),
        (a.clone(), observed_b.clone(), 0.15 / 0.22),
    ];
    for (var, evidence, expected) in cases {
        for ve in [&pruned, &full] {
            let result = ve
                .infer(&ve.make_query(&[var.clone()], &evidence).unwrap())
                .unwrap();
            assert_abs_diff_eq!(result.probability(1).unwrap(), expected, epsilon = 1e-12);
        }
    }

    // The unset row counts as uniform in the joint as well
    assert_abs_diff_eq!(
        pruned.log_likelihood(&observed_b).unwrap(),
        0.22f64.ln(),
        epsilon = 1e-12
    );
}

#[test]
fn test_mpe_matches_brute_force() {
    let (net, [a, b, c, d]) = diamond();
    let evidence = Evidence::new().with_label(&d, "true").unwrap();
    let ve = VarElim::new(&net, InferenceConfig::default());
    let result = ve
        .infer(&ve.make_mpe(&[b.clone()], &evidence).unwrap())
        .unwrap();

    let (best, best_p) = enumerate(&net, &evidence)
        .into_iter()
        .max_by(|x, y| x.1.total_cmp(&y.1))
        .unwrap();
    let mpe = result.mpe().unwrap();
    for var in [&a, &b, &c] {
        assert_eq!(
            Some(Value::Discrete(mpe[var])),
            best.get(var),
            "{}",
            var.name()
        );
    }
    let index = result.index(&[mpe[&b]]).unwrap();
    assert_abs_diff_eq!(result.log_value(index).unwrap(), best_p.ln(), epsilon = 1e-12);

    // MPE tables are max-products, not a distribution
    let total: f64 = (0..result.len()).map(|i| result.probability(i).unwrap()).sum();
    assert!(total < 1.0);
    assert_eq!(result.mode(), QueryMode::Mpe);
}

#[test]
fn test_zero_probability_evidence_is_reported() {
    let (mut net, a, b, _) = chain();
    let x = Variable::boolean("X");
    net.add_node(
        Cpt::new(
            x.clone(),
            vec![b.clone()],
            array![[1.0, 0.0], [1.0, 0.0]].into_dyn(),
        )
        .unwrap(),
    )
    .unwrap();
    let ve = VarElim::new(&net, InferenceConfig::default());
    let evidence = Evidence::new().with_label(&x, "true").unwrap();
    assert!(matches!(
        ve.infer(&ve.make_query(&[a], &evidence).unwrap()),
        Err(FactorError::ZeroProbabilityEvidence)
    ));
}

#[test]
fn test_gibbs_close_to_exact() {
    let (net, a, _, c) = chain();
    let evidence = Evidence::new().with_label(&c, "true").unwrap();
    let config = GibbsConfig::default()
        .with_burn_in(200)
        .with_num_samples(5000)
        .with_seed(7);
    let estimate = GibbsSampler::new(&net, config)
        .run(&[a.clone()], &evidence)
        .unwrap();

    // P(A=1, C=1) = 0.3 * 0.5, P(C=1) = 0.325
    let exact = 0.15 / 0.325;
    assert_abs_diff_eq!(estimate.probability(1).unwrap(), exact, epsilon = 0.05);
    let total: f64 = (0..estimate.len())
        .map(|i| estimate.probability(i).unwrap())
        .sum();
    assert_abs_diff_eq!(total, 1.0, epsilon = 1e-9);
}

#[test]
fn test_em_improves_likelihood_with_hidden_variable() {
    let a = Variable::boolean("A");
    let b = Variable::boolean("B");
    let c = Variable::boolean("C");
    let mut net = BayesNet::new();
    net.add_node(Cpt::uniform(a.clone(), vec![]).unwrap())
        .unwrap();
    net.add_node(Cpt::uniform(b.clone(), vec![a.clone()]).unwrap())
        .unwrap();
    net.add_node(Cpt::uniform(c.clone(), vec![b.clone()]).unwrap())
        .unwrap();

    let mut data = Vec::new();
    for (va, vc, n) in [(0, 0, 6), (0, 1, 2), (1, 0, 1), (1, 1, 3)] {
        for _ in 0..n {
            data.push(
                Evidence::new()
                    .with(&a, Value::Discrete(va))
                    .unwrap()
                    .with(&c, Value::Discrete(vc))
                    .unwrap(),
            );
        }
    }

    let config = EmConfig::default()
        .with_seed(11)
        .with_max_rounds(40)
        .with_tolerance(1e-10)
        .with_num_threads(2);
    let report = EmLearner::new(config).train(&mut net, &data).unwrap();

    assert!(report.rounds >= 2);
    for pair in report.log_likelihoods.windows(2) {
        assert!(pair[1] >= pair[0] - 1e-9, "{} -> {}", pair[0], pair[1]);
    }
    // bounded by the empirical distribution of (A, C)
    let empirical: f64 = [6.0f64, 2.0, 1.0, 3.0]
        .iter()
        .map(|n| n * (n / 12.0).ln())
        .sum();
    assert!(report.final_log_likelihood().unwrap() <= empirical + 1e-9);

    let Some(Node::Cpt(root)) = net.node_for(&a) else {
        panic!("A should be a CPT");
    };
    assert_abs_diff_eq!(root.probability(&[], 1).unwrap(), 4.0 / 12.0, epsilon = 1e-12);
}

#[test]
fn test_em_fits_conditional_gaussians() {
    let a = Variable::boolean("A");
    let x = Variable::continuous("X");
    let mut net = BayesNet::new();
    net.add_node(Cpt::uniform(a.clone(), vec![]).unwrap())
        .unwrap();
    net.add_node(Gdt::unset(x.clone(), vec![a.clone()]).unwrap())
        .unwrap();

    let data: Vec<Evidence> = [(0, 1.0), (0, 3.0), (1, 10.0), (1, 12.0)]
        .iter()
        .map(|&(va, vx)| {
            Evidence::new()
                .with(&a, Value::Discrete(va))
                .unwrap()
                .with(&x, Value::Continuous(vx))
                .unwrap()
        })
        .collect();
    let report = EmLearner::new(EmConfig::default().with_num_threads(1))
        .train(&mut net, &data)
        .unwrap();
    assert!(report.converged);

    let Some(Node::Gdt(gdt)) = net.node_for(&x) else {
        panic!("X should be a GDT");
    };
    let low = gdt.gaussian(&[0]).unwrap().unwrap();
    let high = gdt.gaussian(&[1]).unwrap().unwrap();
    assert_abs_diff_eq!(low.mean, 2.0, epsilon = 1e-12);
    assert_abs_diff_eq!(low.variance, 1.0, epsilon = 1e-9);
    assert_abs_diff_eq!(high.mean, 11.0, epsilon = 1e-12);
    assert_abs_diff_eq!(high.variance, 1.0, epsilon = 1e-9);
}

/// A -> X with X | A=0 ~ N(0, 1), X | A=1 ~ N(5, 2)
fn mixture(prior: &[f64]) -> (BayesNet, Variable, Variable) {
    let a = Variable::boolean("A");
    let x = Variable::continuous("X");
    let mut net = BayesNet::new();
    net.add_node(Cpt::prior(a.clone(), prior).unwrap()).unwrap();
    net.add_node(
        Gdt::new(
            x.clone(),
            vec![a.clone()],
            vec![
                Gaussian::new(0.0, 1.0).unwrap(),
                Gaussian::new(5.0, 2.0).unwrap(),
            ],
        )
        .unwrap(),
    )
    .unwrap();
    (net, a, x)
}

#[test]
fn test_continuous_query_marginal_density() {
    let (net, _, x) = mixture(&[0.7, 0.3]);
    let ve = VarElim::new(&net, InferenceConfig::default());
    let result = ve
        .infer(&ve.make_query(&[x.clone()], &Evidence::new()).unwrap())
        .unwrap();

    assert!(result.variables().is_empty());
    assert_eq!(result.non_enum_variables(), &[x.clone()]);
    let density = result.marginal_density(&x).unwrap();
    assert_eq!(density.num_components(), 2);
    assert_abs_diff_eq!(density.mean(), 1.5, epsilon = 1e-12);
    // 0.7*(1 + 1.5^2) + 0.3*(2 + 3.5^2)
    assert_abs_diff_eq!(density.variance(), 6.55, epsilon = 1e-12);
}

#[test]
fn test_continuous_evidence_updates_discrete_parent() {
    let (net, a, x) = mixture(&[0.7, 0.3]);
    let ve = VarElim::new(&net, InferenceConfig::default());
    let evidence = Evidence::new().with(&x, Value::Continuous(4.0)).unwrap();
    let result = ve
        .infer(&ve.make_query(&[a.clone()], &evidence).unwrap())
        .unwrap();

    let w0 = 0.7 * Gaussian::new(0.0, 1.0).unwrap().pdf(4.0);
    let w1 = 0.3 * Gaussian::new(5.0, 2.0).unwrap().pdf(4.0);
    assert_abs_diff_eq!(result.probability(1).unwrap(), w1 / (w0 + w1), epsilon = 1e-12);
    assert_abs_diff_eq!(
        ve.log_likelihood(&evidence).unwrap(),
        (w0 + w1).ln(),
        epsilon = 1e-12
    );
}

#[test]
fn test_cg_safety_keeps_impossible_branches() {
    let (net, a, x) = mixture(&[1.0, 0.0]);

    let plain = VarElim::new(&net, InferenceConfig::default());
    let result = plain
        .infer(&plain.make_query(&[a.clone(), x.clone()], &Evidence::new()).unwrap())
        .unwrap();
    assert_eq!(result.variables(), &[a.clone()]);
    assert!(result.density(0, &x).is_some());
    assert!(result.density(1, &x).is_none());
    assert_eq!(result.indices(), vec![0]);

    let safe = VarElim::new(&net, InferenceConfig::default().with_cg_safety(true));
    let result = safe
        .infer(&safe.make_query(&[a.clone(), x.clone()], &Evidence::new()).unwrap())
        .unwrap();
    let kept = result.density(1, &x).unwrap();
    assert_abs_diff_eq!(kept.mean(), 5.0, epsilon = 1e-12);
    assert_eq!(result.probability(1).unwrap(), 0.0);
}

#[test]
fn test_noisy_or_inference() {
    let cold = Variable::boolean("Cold");
    let flu = Variable::boolean("Flu");
    let fever = Variable::boolean("Fever");
    let mut net = BayesNet::new();
    net.add_node(Cpt::prior(cold.clone(), &[0.8, 0.2]).unwrap())
        .unwrap();
    net.add_node(Cpt::prior(flu.clone(), &[0.9, 0.1]).unwrap())
        .unwrap();
    net.add_node(
        NoisyOr::new(
            fever.clone(),
            vec![cold.clone(), flu.clone()],
            vec![0.3, 0.8],
            0.05,
        )
        .unwrap(),
    )
    .unwrap();

    let ve = VarElim::new(&net, InferenceConfig::default());
    let p = ve
        .infer(&ve.make_query(&[fever.clone()], &Evidence::new()).unwrap())
        .unwrap()
        .probability(1)
        .unwrap();
    assert_abs_diff_eq!(p, brute_posterior(&net, &fever, &Evidence::new()), epsilon = 1e-12);

    let evidence = Evidence::new().with_label(&fever, "true").unwrap();
    let flu_given_fever = ve
        .infer(&ve.make_query(&[flu.clone()], &evidence).unwrap())
        .unwrap()
        .probability(1)
        .unwrap();
    assert_abs_diff_eq!(
        flu_given_fever,
        brute_posterior(&net, &flu, &evidence),
        epsilon = 1e-12
    );
    assert!(flu_given_fever > 0.1);
}
