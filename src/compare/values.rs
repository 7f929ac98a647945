use crate::resource::JsonObject;

use serde_json::Value;

use std::fmt::{self, Display, Write};

#[derive(Debug, PartialEq)]
pub struct Diff<'a> {
    pub path: String,
    pub deployed: &'a Value,
    pub requested: &'a Value,
}

impl<'a> Display for Diff<'a> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "Diff at path: '{}', deployed: {}, requested: {}",
            self.path, self.deployed, self.requested
        )
    }
}

pub struct Diffs<'a>(Vec<Diff<'a>>);

impl<'a> Diffs<'a> {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn non_empty(&self) -> bool {
        !self.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl<'a> Display for Diffs<'a> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.is_empty() {
            f.write_str("<empty>")
        } else {
            write!(f, "{} differences: ", self.0.len())?;
            for (i, diff) in self.0.iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                Display::fmt(diff, f)?;
            }
            Ok(())
        }
    }
}

enum Segment<'a> {
    Key(&'a str),
    Index(usize),
}

/// Compares the json of a deployed and a requested object. The result is empty as long as `deployed`
/// is a superset of `requested`: every value in `requested` must be present and equal in `deployed`,
/// while values that only exist in `deployed` are ignored, since those are usually filled in by the
/// api server.
///
/// Arrays whose requested items are all objects with a string `name` are treated as associative
/// arrays, and their items are matched by name instead of by position. This is how Kubernetes models
/// things like environment variables, containers and ports:
///
/// ```json
/// {
///     "env": [
///         { "name": "foo", "value": "fooValue" },
///         { "name": "bar", "value": "barValue" }
///     ]
/// }
/// ```
pub fn compare_values<'a>(deployed: &'a Value, requested: &'a Value) -> Diffs<'a> {
    let mut diffs = Vec::new();
    let mut path = Vec::with_capacity(8);
    compare(&mut diffs, &mut path, deployed, requested);
    Diffs(diffs)
}

fn compare<'a>(
    diffs: &mut Vec<Diff<'a>>,
    path: &mut Vec<Segment<'a>>,
    superset: &'a Value,
    subset: &'a Value,
) {
    match (superset, subset) {
        (Value::Object(ref super_map), Value::Object(ref sub_map)) => {
            compare_objects(diffs, path, super_map, sub_map);
        }
        (Value::Array(ref super_array), Value::Array(ref sub_array)) => {
            compare_arrays(diffs, path, super_array, sub_array);
        }
        (a, b) if a != b => {
            diffs.push(diff(&*path, a, b));
        }
        _ => {}
    }
}

fn compare_objects<'a>(
    diffs: &mut Vec<Diff<'a>>,
    path: &mut Vec<Segment<'a>>,
    deployed: &'a JsonObject,
    requested: &'a JsonObject,
) {
    for (key, requested_val) in requested.iter() {
        path.push(Segment::Key(key));
        match deployed.get(key) {
            Some(deployed_val) => compare(diffs, path, deployed_val, requested_val),
            None => diffs.push(diff(&*path, &Value::Null, requested_val)),
        }
        path.pop();
    }
}

fn compare_arrays<'a>(
    diffs: &mut Vec<Diff<'a>>,
    path: &mut Vec<Segment<'a>>,
    deployed: &'a [Value],
    requested: &'a [Value],
) {
    for (i, requested_item) in requested.iter().enumerate() {
        path.push(Segment::Index(i));
        let deployed_item = if is_associative(requested) {
            item_name(requested_item).and_then(|name| find_by_name(deployed, name))
        } else {
            deployed.get(i)
        };
        match deployed_item {
            Some(deployed_item) => compare(diffs, path, deployed_item, requested_item),
            None => diffs.push(diff(&*path, &Value::Null, requested_item)),
        }
        path.pop();
    }
}

fn item_name(item: &Value) -> Option<&str> {
    item.get("name").and_then(Value::as_str)
}

fn find_by_name<'a>(items: &'a [Value], name: &str) -> Option<&'a Value> {
    items.iter().find(|item| item_name(item) == Some(name))
}

fn is_associative(requested: &[Value]) -> bool {
    !requested.is_empty() && requested.iter().all(|v| item_name(v).is_some())
}

fn diff<'a>(path: &[Segment], deployed: &'a Value, requested: &'a Value) -> Diff<'a> {
    let mut p = String::with_capacity(8);
    for s in path.iter() {
        p.push('.');
        match s {
            Segment::Key(ref k) => p.push_str(k),
            Segment::Index(i) => {
                let _ = write!(p, "{}", i);
            }
        }
    }
    Diff {
        path: p,
        deployed,
        requested,
    }
}

/// Merges `requested` into `deployed`. Objects are merged key by key, so values that only exist in
/// `deployed` are kept. Associative arrays take their items from `requested`, each one merged into the
/// deployed item with the same name. Everything else is replaced.
pub fn merge_values(deployed: &mut Value, requested: &Value) {
    match (deployed, requested) {
        (Value::Object(deployed_map), Value::Object(requested_map)) => {
            for (key, requested_val) in requested_map.iter() {
                match deployed_map.get_mut(key) {
                    Some(deployed_val) => merge_values(deployed_val, requested_val),
                    None => {
                        deployed_map.insert(key.clone(), requested_val.clone());
                    }
                }
            }
        }
        (Value::Array(deployed_items), Value::Array(requested_items))
            if is_associative(requested_items) =>
        {
            let merged = requested_items
                .iter()
                .map(|requested_item| {
                    let existing = item_name(requested_item)
                        .and_then(|name| find_by_name(deployed_items, name))
                        .cloned();
                    match existing {
                        Some(mut item) => {
                            merge_values(&mut item, requested_item);
                            item
                        }
                        None => requested_item.clone(),
                    }
                })
                .collect();
            *deployed_items = merged;
        }
        (deployed, requested) => *deployed = requested.clone(),
    }
}
