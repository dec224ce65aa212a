//! Benchmarks for the cart-pole dynamics
//!
//! Measures:
//! - One derivative evaluation, with and without a friction re-solve
//! - One 20 ms control step with each integration method
//! - A full simulated step through the agent

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use std::hint::black_box;

use cartpole_rig::agent::{AgentBuilder, SimulationParams, StartDistribution};
use cartpole_rig::integration::{CartpoleParams, FrictionContext, Integrator, Method, evaluate};
use cartpole_rig::types::PhysicalState;

fn bench_evaluate(c: &mut Criterion) {
    let params = CartpoleParams::default();
    let state = PhysicalState::new(0.1, 0.5, 0.05, -0.2);

    let mut group = c.benchmark_group("evaluate");
    group.bench_function("steady_context", |b| {
        let context = evaluate(&params, &state, 10.0, FrictionContext::default()).unwrap().context;
        b.iter(|| evaluate(black_box(&params), black_box(&state), black_box(10.0), black_box(context)))
    });
    group.bench_function("sign_flip", |b| {
        let flipped = FrictionContext { last_normal_force: -1.0 };
        b.iter(|| evaluate(black_box(&params), black_box(&state), black_box(0.0), black_box(flipped)))
    });
    group.finish();
}

fn bench_integrator_step(c: &mut Criterion) {
    let state = PhysicalState::new(0.0, 0.0, 0.05, 0.0);

    let mut group = c.benchmark_group("integrator_step");
    for (method, resolution) in [(Method::Rk4, 2), (Method::Rk4, 100), (Method::Rk45, 2), (Method::Rk45, 100)] {
        let id = BenchmarkId::new(format!("{method:?}"), resolution);
        group.bench_with_input(id, &resolution, |b, &resolution| {
            let mut integrator = Integrator::new(CartpoleParams::default(), method, resolution).unwrap();
            b.iter(|| integrator.step(black_box(&state), black_box(10.0), black_box(0.02)).unwrap())
        });
    }
    group.finish();
}

fn bench_agent_step(c: &mut Criterion) {
    let params = SimulationParams {
        start: StartDistribution::at(PhysicalState::default()),
        ..SimulationParams::default()
    };
    let mut agent = AgentBuilder::new("bench").seed(0).simulated(params).unwrap();

    c.bench_function("agent_step_alternating", |b| {
        let mut action = 0;
        b.iter(|| {
            action = 1 - action;
            let result = agent.step(black_box(action)).unwrap();
            if result.done {
                agent.reset().unwrap();
            }
            black_box(result)
        })
    });
}

criterion_group!(benches, bench_evaluate, bench_integrator_step, bench_agent_step);
criterion_main!(benches);
