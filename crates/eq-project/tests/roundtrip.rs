use eq_models::{Database, EndmemberDef, PhaseDef, SublatticeDef, TemperatureFunction};
use eq_project::schema::*;
use eq_project::{load_json, load_yaml, save_json, save_yaml, validate_problem};
use eq_solver::SolverConfig;
use indexmap::IndexMap;

fn simple_problem() -> Problem {
    let database = Database {
        elements: vec!["A".to_string(), "B".to_string()],
        phases: vec![PhaseDef {
            name: "LIQUID".to_string(),
            sublattices: vec![SublatticeDef {
                site_ratio: 1.0,
                constituents: vec!["A".to_string(), "B".to_string()],
            }],
            endmembers: vec![
                EndmemberDef {
                    constituents: vec!["A".to_string()],
                    g: TemperatureFunction::linear(-1000.0, 2.5),
                },
                EndmemberDef {
                    constituents: vec!["B".to_string()],
                    g: TemperatureFunction::constant(0.0),
                },
            ],
            interactions: vec![],
        }],
    };
    let mut conditions = IndexMap::new();
    conditions.insert("T".to_string(), 1200.0);
    conditions.insert("P".to_string(), 101_325.0);
    conditions.insert("X_B".to_string(), 0.3);
    Problem {
        version: LATEST_VERSION,
        name: "Liquid".to_string(),
        database: DatabaseSource::Inline(database),
        conditions,
        initial_state: IndexMap::new(),
        starting_points: vec![StartingPointDef {
            phase: "LIQUID".to_string(),
            site_fractions: Some(vec![0.7, 0.3]),
            amount: 1.0,
            fixed: false,
        }],
        solver: SolverConfig {
            max_iterations: 50,
            ..SolverConfig::default()
        },
        no_miscibility_gap: true,
        properties: vec!["GM".to_string(), "HM.T".to_string()],
    }
}

#[test]
fn roundtrip_yaml_problem() {
    let problem = simple_problem();
    validate_problem(&problem).unwrap();

    let path = std::env::temp_dir().join("eq_project_roundtrip.yaml");
    save_yaml(&path, &problem).unwrap();
    let loaded = load_yaml(&path).unwrap();

    assert_eq!(problem, loaded);
}

#[test]
fn roundtrip_json_problem() {
    let problem = simple_problem();

    let path = std::env::temp_dir().join("eq_project_roundtrip.json");
    save_json(&path, &problem).unwrap();
    let loaded = load_json(&path).unwrap();

    assert_eq!(problem, loaded);
}

#[test]
fn condition_order_is_preserved() {
    let yaml = serde_yaml::to_string(&simple_problem()).unwrap();
    let loaded: Problem = serde_yaml::from_str(&yaml).unwrap();
    let keys: Vec<&str> = loaded.conditions.keys().map(String::as_str).collect();
    assert_eq!(keys, ["T", "P", "X_B"]);
}
