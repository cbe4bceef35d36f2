use proptest::prelude::*;
use rowflow_engine::config::parser;
use rowflow_engine::config::validator;
use rowflow_types::header::normalize;
use rowflow_types::{Row, TableHeader, Value};

#[derive(Debug, Clone)]
enum Op {
    Add(u8),
    Remove(u8),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![(0u8..6).prop_map(Op::Add), (0u8..6).prop_map(Op::Remove)]
}

fn name(n: u8) -> String {
    format!("c{n}")
}

proptest! {
    #[test]
    fn untouched_columns_keep_their_position(ops in prop::collection::vec(op(), 0..24)) {
        let mut header = TableHeader::from_names(&["keep_a", "keep_b"]);
        let pinned: Vec<usize> = header.positions();

        for op in ops {
            header = match op {
                Op::Add(n) => header.add(&name(n)).0,
                // Removing an absent column is an error; the header is unchanged.
                Op::Remove(n) => header.remove(&name(n), None).unwrap_or(header),
            };
            prop_assert_eq!(header.find("keep_a").map(|c| c.position), Some(pinned[0]));
            prop_assert_eq!(header.find("keep_b").map(|c| c.position), Some(pinned[1]));
        }
    }

    #[test]
    fn normalization_is_idempotent(
        ops in prop::collection::vec(op(), 0..16),
        cells in prop::collection::vec(any::<i64>(), 0..32),
    ) {
        let mut header = TableHeader::from_names(&["a", "b", "c"]);
        for op in ops {
            header = match op {
                Op::Add(n) => header.add(&name(n)).0,
                Op::Remove(n) => header.remove(&name(n), None).unwrap_or(header),
            };
        }
        let width = header.physical_width();
        let rows: Vec<Row> = cells
            .chunks(width.max(1))
            .map(|chunk| chunk.iter().copied().map(Value::Int).collect())
            .collect();

        let (once_header, once_rows) = normalize(&header, rows);
        prop_assert!(once_header.is_normalized());
        let (twice_header, twice_rows) = normalize(&once_header, once_rows.clone());
        prop_assert_eq!(twice_header.names(), once_header.names());
        prop_assert_eq!(twice_header.positions(), once_header.positions());
        prop_assert_eq!(twice_rows, once_rows);
    }

    #[test]
    fn split_in_requires_keys(key_count in 0_usize..3) {
        let keys: Vec<String> = (0..key_count).map(|i| format!("k{i}")).collect();
        let yaml = format!(
            r#"
version: "1.0"
pipeline: prop_split_policy
steps:
  - split_in:
      keys: [{keys}]
      steps:
        - normalize
"#,
            keys = keys.join(", ")
        );

        let config = parser::parse_pipeline_str(&yaml).expect("generated yaml must parse");
        let result = validator::validate_pipeline(&config);

        if key_count == 0 {
            prop_assert!(result.is_err());
        } else {
            prop_assert!(result.is_ok());
        }
    }
}
