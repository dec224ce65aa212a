//! Episode lifecycle through the public simulated environment API.

use std::collections::BTreeMap;

use cartpole_rig::agent::{BalanceParams, GoalConfig, SimulationParams, StartDistribution};
use cartpole_rig::config::{AgentConfig, RigConfig, SessionSettings};
use cartpole_rig::types::{Bounds, FailureBounds, FailureDescriptor, PhysicalState};
use cartpole_rig::{Environment, Rig, SimulatedEnv};

fn balance_env() -> SimulatedEnv {
    env_with_angle(Bounds::symmetric(0.2095))
}

fn env_with_angle(angle: Bounds) -> SimulatedEnv {
    let simulation = SimulationParams {
        start: StartDistribution::at(PhysicalState::default()),
        force_magnitude: 10.0,
        ..SimulationParams::default()
    };
    let goal = GoalConfig::Balance(BalanceParams {
        bounds: FailureBounds {
            position: Bounds::symmetric(2.4),
            angle,
            ..FailureBounds::default()
        },
    });
    let config = RigConfig {
        timestep: 0.02,
        world_size: Bounds::new(-2.5, 2.5),
        agents: vec![AgentConfig { goal, seed: Some(0), ..AgentConfig::simulated("cart", simulation) }],
        session: SessionSettings::default(),
    };
    Rig::simulate(&config).expect("valid configuration")
}

fn action(value: i64) -> BTreeMap<String, i64> {
    BTreeMap::from([("cart".to_string(), value)])
}

/// Pushes under the pole: forward when it leans or swings forward.
fn lean_policy(observation: &[f64]) -> i64 {
    let (theta, theta_dot) = (observation[2], observation[3]);
    i64::from(theta + 0.2 * theta_dot > 0.0)
}

#[test]
fn countering_the_lean_stays_balanced() {
    let mut env = balance_env();
    let mut observation = env.reset_sync().unwrap()["cart"].clone();

    let mut previous = 0;
    let mut switches = 0;
    let mut last_action = None;
    for step in 0..200 {
        let next = lean_policy(&observation);
        if last_action.is_some_and(|a| a != next) {
            switches += 1;
        }
        last_action = Some(next);

        let results = env.step_sync(&action(next)).unwrap();
        let result = &results["cart"];
        assert!(!result.done, "failed at step {step}: {:?}", result.info.failures);
        assert!(result.info.steps > previous);
        previous = result.info.steps;
        assert_eq!(result.reward, 1.0);
        observation = result.observation.clone();
    }
    assert_eq!(previous, 200);
    assert!(switches > 10, "policy should alternate, switched {switches} times");
}

#[test]
fn blind_alternation_eventually_drops_the_pole() {
    let mut env = balance_env();
    env.reset_sync().unwrap();

    let mut failures = None;
    for step in 0..1000 {
        let results = env.step_sync(&action(step % 2)).unwrap();
        if results["cart"].done {
            failures = Some(results["cart"].info.failures.clone());
            break;
        }
    }
    let failures = failures.expect("episode should end within 1000 steps");
    assert!(
        failures.iter().any(|f| matches!(f, FailureDescriptor::AngleLeft | FailureDescriptor::AngleRight)),
        "{failures:?}"
    );
}

#[test]
fn constant_force_ends_the_episode() {
    for direction in [0, 1] {
        let mut env = balance_env();
        env.reset_sync().unwrap();

        let mut outcome = None;
        for _ in 0..1000 {
            let results = env.step_sync(&action(direction)).unwrap();
            let result = results["cart"].clone();
            if result.done {
                outcome = Some(result);
                break;
            }
        }

        let result = outcome.expect("episode should end within 1000 steps");
        assert!(result.info.steps < 1000);
        assert!(result.info.terminated());
        let failures = &result.info.failures;
        assert!(
            failures.iter().any(|f| matches!(
                f,
                FailureDescriptor::PositionLeft
                    | FailureDescriptor::PositionRight
                    | FailureDescriptor::AngleLeft
                    | FailureDescriptor::AngleRight
            )),
            "{failures:?}"
        );
    }
}

#[test]
fn constant_force_leaves_the_track() {
    for (direction, expected) in [(0, FailureDescriptor::PositionLeft), (1, FailureDescriptor::PositionRight)] {
        let mut env = env_with_angle(Bounds::UNBOUNDED);
        env.reset_sync().unwrap();

        let mut outcome = None;
        for _ in 0..1000 {
            let results = env.step_sync(&action(direction)).unwrap();
            if results["cart"].done {
                outcome = Some(results["cart"].clone());
                break;
            }
        }

        let result = outcome.expect("cart should leave the track within 1000 steps");
        assert!(result.info.steps < 1000);
        assert_eq!(result.info.failures, vec![expected]);
        assert_eq!(result.info.failures[0].to_string(), if direction == 0 { "position/left" } else { "position/right" });
    }
}

#[test]
fn frozen_after_done_until_reset() {
    let mut env = balance_env();
    env.reset_sync().unwrap();

    let mut last = None;
    for _ in 0..1000 {
        let results = env.step_sync(&action(1)).unwrap();
        if results["cart"].done {
            last = Some(results["cart"].clone());
            break;
        }
    }
    let last = last.expect("episode should end");
    let frozen_observation = env.observe("cart").unwrap();

    for _ in 0..5 {
        let results = env.step_sync(&action(0)).unwrap();
        let result = &results["cart"];
        assert!(result.done);
        assert!(result.info.frozen);
        assert_eq!(result.reward, 0.0);
        assert_eq!(result.info.steps, last.info.steps);
        assert_eq!(result.observation, frozen_observation);
    }

    let observations = env.reset_sync().unwrap();
    assert!(observations["cart"].iter().all(|v| *v == 0.0));
    assert!(!env.step_sync(&action(1)).unwrap()["cart"].done);
}

#[test]
fn invalid_action_is_an_error() {
    let mut env = balance_env();
    env.reset_sync().unwrap();
    let error = env.step_sync(&action(2)).unwrap_err();
    assert!(matches!(error, cartpole_rig::RigError::InvalidAction { action: 2, n: 2 }));
}

#[tokio::test]
async fn environment_trait_drives_the_same_episode() {
    let mut env = balance_env();
    let observations = Environment::reset(&mut env).await.unwrap();
    assert_eq!(env.agent_names(), vec!["cart".to_string()]);
    assert_eq!(observations["cart"].len(), 4);

    let results = Environment::step(&mut env, &action(1)).await.unwrap();
    assert!(results["cart"].observation[1] > 0.0);
    env.close().await.unwrap();
}
