// Copyright 2026 Stratum Contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! End-to-end behavior of the document layer against the memory store.

use pretty_assertions::assert_eq;
use stratum::{Database, Directory, Error, Kind, Object, Record, Value};

#[derive(Clone, Default, Debug, PartialEq)]
struct User {
    id: i64,
    login: String,
}

impl Record for User {
    fn get_field(&self, pos: usize) -> Value {
        match pos {
            0 => self.id.into(),
            1 => self.login.clone().into(),
            _ => unreachable!("field position out of range"),
        }
    }

    fn set_field(&mut self, pos: usize, value: Value) {
        match (pos, value) {
            (0, Value::I64(v)) => self.id = v,
            (1, Value::String(v)) => self.login = v,
            _ => {}
        }
    }
}

fn user(login: &str) -> User {
    User { id: 0, login: login.into() }
}

#[derive(Clone, Default, Debug, PartialEq)]
struct Message {
    chat_id: i64,
    id: i64,
    text: String,
}

impl Record for Message {
    fn get_field(&self, pos: usize) -> Value {
        match pos {
            0 => self.chat_id.into(),
            1 => self.id.into(),
            2 => self.text.clone().into(),
            _ => unreachable!("field position out of range"),
        }
    }

    fn set_field(&mut self, pos: usize, value: Value) {
        match (pos, value) {
            (0, Value::I64(v)) => self.chat_id = v,
            (1, Value::I64(v)) => self.id = v,
            (2, Value::String(v)) => self.text = v,
            _ => {}
        }
    }
}

#[derive(Clone, Default, Debug, PartialEq)]
struct Chat {
    id: i64,
    name: String,
    /// Data carrier for the per-edge payload; never stored on the chat
    /// itself.
    topic: String,
}

impl Record for Chat {
    fn get_field(&self, pos: usize) -> Value {
        match pos {
            0 => self.id.into(),
            1 => self.name.clone().into(),
            2 => self.topic.clone().into(),
            _ => unreachable!("field position out of range"),
        }
    }

    fn set_field(&mut self, pos: usize, value: Value) {
        match (pos, value) {
            (0, Value::I64(v)) => self.id = v,
            (1, Value::String(v)) => self.name = v,
            (2, Value::String(v)) => self.topic = v,
            _ => {}
        }
    }
}

#[derive(Clone, Default, Debug, PartialEq)]
struct Person {
    id: i64,
    city: String,
    age: i32,
}

impl Record for Person {
    fn get_field(&self, pos: usize) -> Value {
        match pos {
            0 => self.id.into(),
            1 => self.city.clone().into(),
            2 => self.age.into(),
            _ => unreachable!("field position out of range"),
        }
    }

    fn set_field(&mut self, pos: usize, value: Value) {
        match (pos, value) {
            (0, Value::I64(v)) => self.id = v,
            (1, Value::String(v)) => self.city = v,
            (2, Value::I32(v)) => self.age = v,
            _ => {}
        }
    }
}

#[derive(Clone, Default, Debug, PartialEq)]
struct Place {
    id: i64,
    name: String,
    lat: f64,
    lon: f64,
}

impl Record for Place {
    fn get_field(&self, pos: usize) -> Value {
        match pos {
            0 => self.id.into(),
            1 => self.name.clone().into(),
            2 => self.lat.into(),
            3 => self.lon.into(),
            _ => unreachable!("field position out of range"),
        }
    }

    fn set_field(&mut self, pos: usize, value: Value) {
        match (pos, value) {
            (0, Value::I64(v)) => self.id = v,
            (1, Value::String(v)) => self.name = v,
            (2, Value::F64(v)) => self.lat = v,
            (3, Value::F64(v)) => self.lon = v,
            _ => {}
        }
    }
}

#[derive(Clone, Default, Debug, PartialEq)]
struct BigUser {
    id: i64,
    login: String,
    score: i64,
    reactions: Vec<(String, i32)>,
    subscription: bool,
    sandbox: bool,
}

impl Record for BigUser {
    fn get_field(&self, pos: usize) -> Value {
        match pos {
            0 => self.id.into(),
            1 => self.login.clone().into(),
            2 => self.score.into(),
            3 => Value::Map(
                self.reactions
                    .iter()
                    .map(|(k, v)| (k.clone().into(), Value::I32(*v)))
                    .collect(),
            ),
            4 => self.subscription.into(),
            5 => self.sandbox.into(),
            _ => unreachable!("field position out of range"),
        }
    }

    fn set_field(&mut self, pos: usize, value: Value) {
        match (pos, value) {
            (0, Value::I64(v)) => self.id = v,
            (1, Value::String(v)) => self.login = v,
            (2, Value::I64(v)) => self.score = v,
            (3, Value::Map(entries)) => {
                self.reactions = entries
                    .into_iter()
                    .filter_map(|(k, v)| match (k, v) {
                        (Value::String(k), Value::I32(v)) => Some((k, v)),
                        _ => None,
                    })
                    .collect();
            }
            (4, Value::Bool(v)) => self.subscription = v,
            (5, Value::Bool(v)) => self.sandbox = v,
            _ => {}
        }
    }
}

async fn open_dir(name: &str) -> (Database, Directory) {
    let db = Database::memory();
    let dir = Directory::open(&db, name).await.unwrap();
    (db, dir)
}

async fn build_users(dir: &Directory, name: &str) -> Object<User> {
    dir.object::<User>(name)
        .field("id,primary,autoincrement", Kind::I64)
        .field("login", Kind::String)
        .done()
        .await
        .unwrap()
}

#[tokio::test]
async fn test_auto_increment_add_and_get() {
    let (_db, dir) = open_dir("tests").await;
    let users = build_users(&dir, "user").await;

    let john = users.add(&user("john")).exec().await.unwrap();
    assert_eq!(john, User { id: 1, login: "john".into() });

    let sam = users.add(&user("sam")).exec().await.unwrap();
    assert_eq!(sam.id, 2);

    let fetched = users.get(1i64).exec().await.unwrap();
    assert_eq!(fetched, User { id: 1, login: "john".into() });
    let fetched = users.get(2i64).exec().await.unwrap();
    assert_eq!(fetched.login, "sam");
}

#[tokio::test]
async fn test_unique_index_get_by() {
    let (_db, dir) = open_dir("tests").await;
    let users = dir
        .object::<User>("user")
        .field("id,primary", Kind::I64)
        .field("login,unique", Kind::String)
        .done()
        .await
        .unwrap();

    users
        .set(&User { id: 20, login: "john25".into() })
        .exec()
        .await
        .unwrap();

    let fetched = users.get_by("login", &user("john25")).exec().await.unwrap();
    assert_eq!(fetched, User { id: 20, login: "john25".into() });

    let missing = users.get_by("login", &user("nobody")).exec().await;
    assert_eq!(missing, Err(Error::NotFound));
}

#[tokio::test]
async fn test_unique_index_rejects_second_primary() {
    let (_db, dir) = open_dir("tests").await;
    let users = dir
        .object::<User>("user")
        .field("id,primary", Kind::I64)
        .field("login,unique", Kind::String)
        .done()
        .await
        .unwrap();

    users
        .set(&User { id: 1, login: "taken".into() })
        .exec()
        .await
        .unwrap();
    let err = users
        .set(&User { id: 2, login: "taken".into() })
        .exec()
        .await
        .unwrap_err();
    assert_eq!(err, Error::AlreadyExists);

    // The speculative write of the losing transaction must not have
    // leaked.
    assert_eq!(users.get(2i64).exec().await, Err(Error::NotFound));
    let kept = users.get_by("login", &user("taken")).exec().await.unwrap();
    assert_eq!(kept.id, 1);
}

#[tokio::test]
async fn test_plain_index_lists_in_primary_order() {
    let (_db, dir) = open_dir("tests").await;
    let users = dir
        .object::<User>("user")
        .field("id,primary,autoincrement", Kind::I64)
        .field("login", Kind::String)
        .index(&["login"])
        .done()
        .await
        .unwrap();

    for _ in 0..3 {
        users.add(&user("a")).exec().await.unwrap();
    }
    users.add(&user("b")).exec().await.unwrap();

    let hits = users
        .use_index("login")
        .list(vec!["a".into()])
        .scan_all()
        .await
        .unwrap();
    assert_eq!(hits.len(), 3);
    let ids: Vec<i64> = hits.iter().map(|u| u.id).collect();
    assert_eq!(ids, vec![1, 2, 3]);
}

#[tokio::test]
async fn test_composite_primary_list() {
    let (_db, dir) = open_dir("tests").await;
    let messages = dir
        .object::<Message>("message")
        .field("chat_id,primary", Kind::I64)
        .field("id,primary", Kind::I64)
        .field("text", Kind::String)
        .done()
        .await
        .unwrap();

    messages
        .set(&Message { chat_id: 1, id: 2, text: "second".into() })
        .exec()
        .await
        .unwrap();
    messages
        .set(&Message { chat_id: 1, id: 1, text: "first".into() })
        .exec()
        .await
        .unwrap();
    messages
        .set(&Message { chat_id: 2, id: 1, text: "other chat".into() })
        .exec()
        .await
        .unwrap();

    let listed = messages.list(vec![1i64.into()]).scan_all().await.unwrap();
    assert_eq!(
        listed,
        vec![
            Message { chat_id: 1, id: 1, text: "first".into() },
            Message { chat_id: 1, id: 2, text: "second".into() },
        ]
    );

    let reversed = messages
        .list(vec![1i64.into()])
        .reverse()
        .scan_all()
        .await
        .unwrap();
    assert_eq!(reversed[0].id, 2);

    let by_tuple = messages.get((1i64, 2i64)).exec().await.unwrap();
    assert_eq!(by_tuple.text, "second");
}

#[tokio::test]
async fn test_slice_returns_raw_values() {
    let (_db, dir) = open_dir("tests").await;
    let messages = dir
        .object::<Message>("message")
        .field("chat_id,primary", Kind::I64)
        .field("id,primary", Kind::I64)
        .field("text", Kind::String)
        .done()
        .await
        .unwrap();

    messages
        .set(&Message { chat_id: 1, id: 1, text: "first".into() })
        .exec()
        .await
        .unwrap();
    messages
        .set(&Message { chat_id: 1, id: 2, text: "second".into() })
        .exec()
        .await
        .unwrap();

    let values = messages.list(vec![1i64.into()]).slice().await.unwrap();
    assert_eq!(values.len(), 2);
    // Primary fields come decoded from the key tuple, the rest stays as
    // raw cell bytes.
    assert_eq!(values[0].decoded("chat_id"), Some(&Value::I64(1)));
    assert_eq!(values[0].decoded("id"), Some(&Value::I64(1)));
    assert_eq!(values[1].decoded("id"), Some(&Value::I64(2)));
    assert!(values[0].raw("text").is_some());
    assert!(values[0].decoded("text").is_none());
}

#[tokio::test]
async fn test_query_paging() {
    let (_db, dir) = open_dir("tests").await;
    let messages = dir
        .object::<Message>("message")
        .field("chat_id,primary", Kind::I64)
        .field("id,primary", Kind::I64)
        .field("text", Kind::String)
        .done()
        .await
        .unwrap();

    for id in 1..=5i64 {
        messages
            .set(&Message { chat_id: 7, id, text: format!("m{id}") })
            .exec()
            .await
            .unwrap();
    }

    let mut query = messages.list(vec![7i64.into()]).limit(2);
    let mut pages = Vec::new();
    while query.next() {
        let page = query.scan_all().await.unwrap();
        if page.is_empty() {
            break;
        }
        pages.push(page.iter().map(|m| m.id).collect::<Vec<_>>());
    }
    assert_eq!(pages, vec![vec![1, 2], vec![3, 4], vec![5]]);
}

#[tokio::test]
async fn test_set_reindexes_old_entries() {
    let (_db, dir) = open_dir("tests").await;
    let users = dir
        .object::<User>("user")
        .field("id,primary", Kind::I64)
        .field("login", Kind::String)
        .index(&["login"])
        .done()
        .await
        .unwrap();

    users
        .set(&User { id: 5, login: "before".into() })
        .exec()
        .await
        .unwrap();
    users
        .set(&User { id: 5, login: "after".into() })
        .exec()
        .await
        .unwrap();

    let stale = users
        .use_index("login")
        .list(vec!["before".into()])
        .scan_all()
        .await
        .unwrap();
    assert!(stale.is_empty());
    let fresh = users.get_by("login", &user("after")).exec().await.unwrap();
    assert_eq!(fresh.id, 5);
}

#[tokio::test]
async fn test_delete_removes_everything() {
    let (_db, dir) = open_dir("tests").await;
    let people = dir
        .object::<Person>("person")
        .field("id,primary,autoincrement", Kind::I64)
        .field("city", Kind::String)
        .field("age", Kind::I32)
        .index(&["city"])
        .counter(&["city"])
        .done()
        .await
        .unwrap();

    let added = people
        .add(&Person { id: 0, city: "LA".into(), age: 30 })
        .exec()
        .await
        .unwrap();
    let counter = people.counter("city").unwrap();
    assert_eq!(counter.get(&added).exec().await.unwrap(), 1);

    people.delete(added.id).exec().await.unwrap();

    assert_eq!(people.get(added.id).exec().await, Err(Error::NotFound));
    let by_city = people
        .use_index("city")
        .list(vec!["LA".into()])
        .scan_all()
        .await
        .unwrap();
    assert!(by_city.is_empty());
    assert_eq!(counter.get(&added).exec().await.unwrap(), 0);
}

#[tokio::test]
async fn test_counter_population() {
    let (_db, dir) = open_dir("tests").await;
    let people = dir
        .object::<Person>("person")
        .field("id,primary,autoincrement", Kind::I64)
        .field("city", Kind::String)
        .field("age", Kind::I32)
        .counter(&["city", "age"])
        .done()
        .await
        .unwrap();

    for (city, age) in [("LA", 18), ("LA", 18), ("LA", 19), ("SF", 18)] {
        people
            .add(&Person { id: 0, city: city.into(), age })
            .exec()
            .await
            .unwrap();
    }

    let counter = people.counter("city,age").unwrap();
    let probe = Person { id: 0, city: "LA".into(), age: 18 };
    assert_eq!(counter.get(&probe).exec().await.unwrap(), 2);
    let probe = Person { id: 0, city: "SF".into(), age: 18 };
    assert_eq!(counter.get(&probe).exec().await.unwrap(), 1);
    let probe = Person { id: 0, city: "NY".into(), age: 50 };
    assert_eq!(counter.get(&probe).exec().await.unwrap(), 0);
}

#[tokio::test]
async fn test_update_callback() {
    let (_db, dir) = open_dir("tests").await;
    let users = build_users(&dir, "user").await;
    let added = users.add(&user("old")).exec().await.unwrap();

    let updated = users
        .update(&added, |record| {
            record.login = "new".into();
            Ok(())
        })
        .exec()
        .await
        .unwrap();
    assert_eq!(updated.login, "new");
    assert_eq!(users.get(added.id).exec().await.unwrap().login, "new");

    let missing = users
        .update(&User { id: 404, login: String::new() }, |_| Ok(()))
        .exec()
        .await;
    assert_eq!(missing, Err(Error::NotFound));
}

#[tokio::test]
async fn test_write_requires_existing() {
    let (_db, dir) = open_dir("tests").await;
    let users = build_users(&dir, "user").await;

    let err = users
        .write(&User { id: 9, login: "ghost".into() })
        .exec()
        .await
        .unwrap_err();
    assert_eq!(err, Error::NotFound);

    users.set(&User { id: 9, login: "real".into() }).exec().await.unwrap();
    users
        .write(&User { id: 9, login: "rewritten".into() })
        .exec()
        .await
        .unwrap();
    assert_eq!(users.get(9i64).exec().await.unwrap().login, "rewritten");
}

#[tokio::test]
async fn test_multi_get_keeps_order() {
    let (_db, dir) = open_dir("tests").await;
    let users = build_users(&dir, "user").await;
    for i in 0..10 {
        users.add(&user(&format!("sam{i}"))).exec().await.unwrap();
    }

    let fetched = users
        .multi_get(vec![3i64, 1, 7])
        .exec()
        .await
        .unwrap();
    let logins: Vec<&str> = fetched.iter().map(|u| u.login.as_str()).collect();
    assert_eq!(logins, vec!["sam2", "sam0", "sam6"]);

    // A missing key fails the whole batch.
    let err = users.multi_get(vec![1i64, 404]).exec().await.unwrap_err();
    assert_eq!(err, Error::NotFound);
}

#[tokio::test]
async fn test_various_field_kinds() {
    let (_db, dir) = open_dir("tests").await;
    let users = dir
        .object::<BigUser>("big_user")
        .field("id,primary,autoincrement", Kind::I64)
        .field("login", Kind::String)
        .field("score,mutable", Kind::I64)
        .field(
            "reactions",
            Kind::Map(Box::new(Kind::String), Box::new(Kind::I32)),
        )
        .field("subscription", Kind::Bool)
        .field("sandbox", Kind::Bool)
        .done()
        .await
        .unwrap();

    let added = users
        .add(&BigUser {
            id: 0,
            login: "wow".into(),
            score: 1,
            reactions: vec![("hello".into(), 1), ("world".into(), 2)],
            subscription: true,
            sandbox: false,
        })
        .exec()
        .await
        .unwrap();

    let fetched = users.get(added.id).exec().await.unwrap();
    assert_eq!(fetched.score, 1);
    assert_eq!(fetched.reactions, vec![("hello".into(), 1), ("world".into(), 2)]);
    assert!(fetched.subscription);
    assert!(!fetched.sandbox);
}

#[tokio::test]
async fn test_mutable_field_ops() {
    let (_db, dir) = open_dir("tests").await;
    let users = dir
        .object::<BigUser>("big_user")
        .field("id,primary,autoincrement", Kind::I64)
        .field("login", Kind::String)
        .field("score,mutable", Kind::I64)
        .field(
            "reactions",
            Kind::Map(Box::new(Kind::String), Box::new(Kind::I32)),
        )
        .field("subscription", Kind::Bool)
        .field("sandbox", Kind::Bool)
        .done()
        .await
        .unwrap();

    let added = users
        .add(&BigUser { login: "inc".into(), score: 10, ..BigUser::default() })
        .exec()
        .await
        .unwrap();

    let bumped = users
        .inc_field(&added, "score", Value::I64(5))
        .exec()
        .await
        .unwrap();
    assert_eq!(bumped.score, 15);
    assert_eq!(users.get(added.id).exec().await.unwrap().score, 15);

    let doubled = users
        .update_field(&added, "score", |value| match value {
            Value::I64(v) => Ok(Value::I64(v * 2)),
            other => Ok(other),
        })
        .exec()
        .await
        .unwrap();
    assert_eq!(doubled.score, 30);

    // Increments through a non-mutable field are schema misuse.
    let err = users
        .inc_field(&added, "login", Value::I64(1))
        .exec()
        .await
        .unwrap_err();
    assert!(matches!(err, Error::TypeMismatch(_)));
}

#[tokio::test]
async fn test_optional_index_skips_empty() {
    let (_db, dir) = open_dir("tests").await;
    let users = dir
        .object::<User>("user")
        .field("id,primary", Kind::I64)
        .field("login", Kind::String)
        .index_optional(&["login"])
        .done()
        .await
        .unwrap();

    users.set(&User { id: 1, login: String::new() }).exec().await.unwrap();
    users.set(&User { id: 2, login: "x".into() }).exec().await.unwrap();

    let empties = users
        .use_index("login")
        .list(vec![String::new().into()])
        .scan_all()
        .await
        .unwrap();
    assert!(empties.is_empty());

    let hits = users
        .use_index("login")
        .list(vec!["x".into()])
        .scan_all()
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);
}

#[tokio::test]
async fn test_custom_index() {
    let (_db, dir) = open_dir("tests").await;
    let users = dir
        .object::<User>("user")
        .field("id,primary", Kind::I64)
        .field("login", Kind::String)
        .index_custom("first_letter", |record: &User| {
            record
                .login
                .chars()
                .next()
                .map(|c| vec![Value::String(c.to_string())])
        })
        .done()
        .await
        .unwrap();

    users.set(&User { id: 1, login: "alpha".into() }).exec().await.unwrap();
    users.set(&User { id: 2, login: "arrow".into() }).exec().await.unwrap();
    users.set(&User { id: 3, login: "beta".into() }).exec().await.unwrap();
    users.set(&User { id: 4, login: String::new() }).exec().await.unwrap();

    let hits = users
        .use_index("first_letter")
        .list(vec!["a".into()])
        .scan_all()
        .await
        .unwrap();
    assert_eq!(hits.len(), 2);
}

#[tokio::test]
async fn test_search_index() {
    let (_db, dir) = open_dir("tests").await;
    let users = dir
        .object::<User>("user")
        .field("id,primary", Kind::I64)
        .field("login", Kind::String)
        .index_search("search", &["login"])
        .done()
        .await
        .unwrap();

    users
        .set(&User { id: 1, login: "Hello, wide world".into() })
        .exec()
        .await
        .unwrap();
    users
        .set(&User { id: 2, login: "hello there".into() })
        .exec()
        .await
        .unwrap();

    let search = users.search_index("search").unwrap();
    assert_eq!(search.search("hello").exec().await.unwrap().len(), 2);
    assert_eq!(search.search("hello world").exec().await.unwrap().len(), 1);
    assert_eq!(search.search("wide absent").exec().await.unwrap().len(), 0);
    // Prefixes match.
    assert_eq!(search.search("hel").exec().await.unwrap().len(), 2);

    // Update diffs the word sets.
    users
        .set(&User { id: 1, login: "goodbye world".into() })
        .exec()
        .await
        .unwrap();
    assert_eq!(search.search("hello").exec().await.unwrap().len(), 1);
    assert_eq!(search.search("goodbye").exec().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_geo_index_moves_with_record() {
    let (_db, dir) = open_dir("tests").await;
    let places = dir
        .object::<Place>("place")
        .field("id,primary", Kind::I64)
        .field("name", Kind::String)
        .field("lat", Kind::F64)
        .field("lon", Kind::F64)
        .index_geo("geo", "lat", "lon", 4)
        .done()
        .await
        .unwrap();

    places
        .set(&Place { id: 1, name: "spot".into(), lat: 30.1, lon: 50.101 })
        .exec()
        .await
        .unwrap();

    let geo = places.geo_index("geo").unwrap();
    let near = geo.get_geo(30.1, 50.10101, 10).exec().await.unwrap();
    assert_eq!(near.len(), 1);
    assert_eq!(near[0].name, "spot");

    // Move the record; the old cell entry must disappear.
    places
        .set(&Place { id: 1, name: "spot".into(), lat: 50.2, lon: 25.1 })
        .exec()
        .await
        .unwrap();
    let stale = geo.get_geo(30.1, 50.10101, 10).exec().await.unwrap();
    assert!(stale.is_empty());
    let moved = geo.get_geo(50.2, 25.1, 10).exec().await.unwrap();
    assert_eq!(moved.len(), 1);

    // The null island is "not placed".
    places
        .set(&Place { id: 2, name: "nowhere".into(), lat: 0.0, lon: 0.0 })
        .exec()
        .await
        .unwrap();
    let at_zero = geo.get_geo(0.0, 0.0, 10).exec().await.unwrap();
    assert!(at_zero.is_empty());
}

#[tokio::test]
async fn test_reindex_rebuilds_entries() {
    let (_db, dir) = open_dir("tests").await;
    let users = dir
        .object::<User>("user")
        .field("id,primary", Kind::I64)
        .field("login", Kind::String)
        .index(&["login"])
        .done()
        .await
        .unwrap();

    for id in 1..=5i64 {
        users.set(&User { id, login: "same".into() }).exec().await.unwrap();
    }
    users.reindex("login").await.unwrap();

    let hits = users
        .use_index("login")
        .list(vec!["same".into()])
        .scan_all()
        .await
        .unwrap();
    assert_eq!(hits.len(), 5);
}

#[tokio::test]
async fn test_transaction_check_and_try() {
    let (_db, dir) = open_dir("tests").await;
    let users = build_users(&dir, "user").await;
    users.set(&User { id: 1, login: "present".into() }).exec().await.unwrap();

    // A failing `try` task is swallowed; the checked task commits.
    let mut txn = dir.transaction();
    let failing = users.write(&User { id: 42, login: "ghost".into() });
    failing.attempt(&mut txn);
    let passing = users.set(&User { id: 2, login: "fresh".into() });
    passing.check(&mut txn);
    txn.execute().await.unwrap();
    assert_eq!(failing.result(), Err(Error::NotFound));
    passing.result().unwrap();
    assert_eq!(users.get(2i64).exec().await.unwrap().login, "fresh");

    // A failing `check` task cancels everything.
    let mut txn = dir.transaction();
    let failing = users.write(&User { id: 43, login: "ghost".into() });
    failing.check(&mut txn);
    let side_effect = users.set(&User { id: 3, login: "lost".into() });
    side_effect.check(&mut txn);
    assert_eq!(txn.execute().await, Err(Error::NotFound));
    assert_eq!(users.get(3i64).exec().await, Err(Error::NotFound));
}

#[tokio::test]
async fn test_promise_after_runs_in_same_transaction() {
    let (_db, dir) = open_dir("tests").await;
    let users = build_users(&dir, "user").await;

    let adding = users.add(&user("first"));
    let users_for_after = users.clone();
    adding.after(move || users_for_after.set(&User { id: 99, login: "follow-up".into() }));

    let mut txn = dir.transaction();
    adding.check(&mut txn);
    txn.execute().await.unwrap();

    assert_eq!(users.get(1i64).exec().await.unwrap().login, "first");
    assert_eq!(users.get(99i64).exec().await.unwrap().login, "follow-up");
}

#[tokio::test]
async fn test_parallel_promises_one_transaction() {
    let (_db, dir) = open_dir("tests").await;
    let users = build_users(&dir, "user").await;

    let mut txn = dir.transaction();
    let first = users.add(&user("one"));
    let second = users.add(&user("two"));
    first.check(&mut txn);
    second.check(&mut txn);
    txn.execute().await.unwrap();

    let mut ids = vec![first.result().unwrap().id, second.result().unwrap().id];
    ids.sort_unstable();
    assert_eq!(ids, vec![1, 2]);
}

#[tokio::test]
async fn test_add_duplicate_primary() {
    let (_db, dir) = open_dir("tests").await;
    let users = dir
        .object::<User>("user")
        .field("id,primary", Kind::I64)
        .field("login", Kind::String)
        .done()
        .await
        .unwrap();

    users.set(&User { id: 7, login: "first".into() }).exec().await.unwrap();
    let err = users
        .add(&User { id: 7, login: "second".into() })
        .exec()
        .await
        .unwrap_err();
    assert_eq!(err, Error::AlreadyExists);
}

#[tokio::test]
async fn test_primary_kind_mismatch() {
    let (_db, dir) = open_dir("tests").await;
    let users = build_users(&dir, "user").await;
    let err = users.get("not-an-id".to_owned()).exec().await.unwrap_err();
    assert!(matches!(err, Error::TypeMismatch(_)));

    let err = users.get_by("missing_index", &user("x")).exec().await.unwrap_err();
    assert!(matches!(err, Error::TypeMismatch(_)));
}

#[tokio::test]
async fn test_schema_errors() {
    let (_db, dir) = open_dir("tests").await;

    let err = dir
        .object::<User>("user")
        .field("id,primary,uniq", Kind::I64)
        .field("login", Kind::String)
        .done()
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Schema(_)));

    let err = dir
        .object::<User>("user")
        .field("id", Kind::I64)
        .field("login", Kind::String)
        .done()
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Schema(_)));

    let err = dir
        .object::<User>("user")
        .field("id,primary", Kind::I64)
        .field("login,autoincrement", Kind::String)
        .done()
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Schema(_)));
}

#[tokio::test]
async fn test_schema_history_versioning() {
    let db = Database::memory();
    {
        let dir = Directory::open(&db, "app").await.unwrap();
        let users = build_users(&dir, "user").await;
        assert_eq!(users.schema_version(), 1);
        // Same layout, same version.
        let again = build_users(&dir, "user").await;
        assert_eq!(again.schema_version(), 1);
    }
    {
        // A drifted layout records the next version.
        let dir = Directory::open(&db, "app").await.unwrap();
        let users = dir
            .object::<BigUser>("user")
            .field("id,primary,autoincrement", Kind::I64)
            .field("login", Kind::String)
            .field("score,mutable", Kind::I64)
            .field(
                "reactions",
                Kind::Map(Box::new(Kind::String), Box::new(Kind::I32)),
            )
            .field("subscription", Kind::Bool)
            .field("sandbox", Kind::Bool)
            .done()
            .await
            .unwrap();
        assert_eq!(users.schema_version(), 2);
    }
}

#[tokio::test]
async fn test_directory_clear_all() {
    let (_db, dir) = open_dir("tests").await;
    let users = build_users(&dir, "user").await;
    users.add(&user("gone")).exec().await.unwrap();
    dir.clear_all().await.unwrap();
    assert_eq!(users.get(1i64).exec().await, Err(Error::NotFound));

    // Auto-increment state was wiped too: ids restart.
    let fresh = users.add(&user("fresh")).exec().await.unwrap();
    assert_eq!(fresh.id, 1);
}

mod relations {
    use super::*;
    use pretty_assertions::assert_eq;

    async fn build(dir: &Directory) -> (Object<User>, Object<Chat>) {
        let users = build_users(dir, "user").await;
        let chats = dir
            .object::<Chat>("chat")
            .field("id,primary", Kind::I64)
            .field("name", Kind::String)
            .field("topic,unstored", Kind::String)
            .done()
            .await
            .unwrap();
        (users, chats)
    }

    #[tokio::test]
    async fn test_set_is_idempotent_for_counters() {
        let (_db, dir) = open_dir("tests").await;
        let (users, chats) = build(&dir).await;
        let user1 = users.add(&user("u")).exec().await.unwrap();
        for id in 1..=3i64 {
            chats
                .set(&Chat { id, name: format!("c{id}"), topic: String::new() })
                .exec()
                .await
                .unwrap();
        }
        let user_chats = dir.n2n(&users, &chats).counter(true).done().await.unwrap();

        for chat_id in [1i64, 2, 3] {
            user_chats.set(&user1, chat_id).exec().await.unwrap();
        }
        // Re-setting an existing edge must not bump the counter.
        user_chats.set(&user1, 2i64).exec().await.unwrap();

        assert_eq!(user_chats.get_clients_count(&user1).exec().await.unwrap(), 3);
        assert_eq!(user_chats.get_hosts_count(2i64).exec().await.unwrap(), 1);
        assert!(user_chats.check(&user1, 2i64).exec().await.unwrap());
        assert!(!user_chats.check(&user1, 9i64).exec().await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_settles_counters() {
        let (_db, dir) = open_dir("tests").await;
        let (users, chats) = build(&dir).await;
        let user1 = users.add(&user("u")).exec().await.unwrap();
        for id in 1..=3i64 {
            chats
                .set(&Chat { id, name: format!("c{id}"), topic: String::new() })
                .exec()
                .await
                .unwrap();
        }
        let user_chats = dir.n2n(&users, &chats).counter(true).done().await.unwrap();

        for chat_id in [1i64, 2, 3] {
            user_chats.add(&user1, chat_id).exec().await.unwrap();
        }
        let err = user_chats.add(&user1, 1i64).exec().await.unwrap_err();
        assert_eq!(err, Error::AlreadyExists);

        user_chats.delete(&user1, 2i64).exec().await.unwrap();
        // Deleting a missing edge changes nothing.
        user_chats.delete(&user1, 2i64).exec().await.unwrap();

        assert_eq!(user_chats.get_clients_count(&user1).exec().await.unwrap(), 2);
        assert!(!user_chats.check(&user1, 2i64).exec().await.unwrap());
    }

    #[tokio::test]
    async fn test_traversal_and_payload() {
        let (_db, dir) = open_dir("tests").await;
        let (users, chats) = build(&dir).await;
        let user1 = users.add(&user("u")).exec().await.unwrap();
        for id in 1..=3i64 {
            chats
                .set(&Chat { id, name: format!("c{id}"), topic: String::new() })
                .exec()
                .await
                .unwrap();
        }
        let user_chats = dir
            .n2n(&users, &chats)
            .counter(true)
            .client_data("topic")
            .done()
            .await
            .unwrap();

        for id in 1..=3i64 {
            let chat = Chat { id, name: format!("c{id}"), topic: format!("topic{id}") };
            user_chats.set(&user1, &chat).exec().await.unwrap();
        }

        let listed = user_chats.get_clients(&user1).exec().await.unwrap();
        assert_eq!(listed.len(), 3);
        assert_eq!(listed[0].id, 1);
        assert_eq!(listed[0].topic, "topic1");
        assert_eq!(listed[2].topic, "topic3");

        let limited = user_chats.get_clients(&user1).limit(2).exec().await.unwrap();
        assert_eq!(limited.len(), 2);

        let hosts = user_chats.get_hosts(2i64).exec().await.unwrap();
        assert_eq!(hosts.len(), 1);
        assert_eq!(hosts[0].id, user1.id);

        let ids = user_chats.get_client_ids(&user1, 10).exec().await.unwrap();
        assert_eq!(ids.len(), 3);
        assert_eq!(ids[1].id, vec![Value::I64(2)]);
        assert!(!ids[1].data.is_empty());
    }

    #[tokio::test]
    async fn test_update_data_touches_only_payload() {
        let (_db, dir) = open_dir("tests").await;
        let (users, chats) = build(&dir).await;
        let user1 = users.add(&user("u")).exec().await.unwrap();
        let chat = Chat { id: 1, name: "c1".into(), topic: String::new() };
        chats.set(&chat).exec().await.unwrap();
        let user_chats = dir
            .n2n(&users, &chats)
            .client_data("topic")
            .done()
            .await
            .unwrap();

        let with_topic = Chat { topic: "initial".into(), ..chat.clone() };
        user_chats.set(&user1, &with_topic).exec().await.unwrap();

        let (_, updated_chat) = user_chats
            .update_data(&user1, &chat, |_, c| {
                c.topic = format!("{}-edited", c.topic);
                Ok(())
            })
            .exec()
            .await
            .unwrap();
        assert_eq!(updated_chat.topic, "initial-edited");

        let listed = user_chats.get_clients(&user1).exec().await.unwrap();
        assert_eq!(listed[0].topic, "initial-edited");

        // The chat's own row is untouched; topic is unstored anyway.
        let stored = chats.get(1i64).exec().await.unwrap();
        assert_eq!(stored.topic, "");
        assert_eq!(stored.name, "c1");
    }

    #[tokio::test]
    async fn test_denormalized_client_counter() {
        let (_db, dir) = open_dir("tests").await;
        let users = build_users(&dir, "user").await;
        let boards = dir
            .object::<BigUser>("board")
            .field("id,primary", Kind::I64)
            .field("login", Kind::String)
            .field("score,mutable", Kind::I64)
            .field(
                "reactions",
                Kind::Map(Box::new(Kind::String), Box::new(Kind::I32)),
            )
            .field("subscription", Kind::Bool)
            .field("sandbox", Kind::Bool)
            .done()
            .await
            .unwrap();
        boards
            .set(&BigUser { id: 1, login: "board".into(), ..BigUser::default() })
            .exec()
            .await
            .unwrap();

        let membership = dir
            .n2n(&users, &boards)
            .counter(true)
            .counter_client_field("score")
            .done()
            .await
            .unwrap();

        let alice = users.add(&user("alice")).exec().await.unwrap();
        let bob = users.add(&user("bob")).exec().await.unwrap();
        membership.set(&alice, 1i64).exec().await.unwrap();
        membership.set(&bob, 1i64).exec().await.unwrap();

        // The count landed in the board's own mutable field.
        assert_eq!(boards.get(1i64).exec().await.unwrap().score, 2);
        assert_eq!(membership.get_hosts_count(1i64).exec().await.unwrap(), 2);

        membership.delete(&alice, 1i64).exec().await.unwrap();
        assert_eq!(boards.get(1i64).exec().await.unwrap().score, 1);
    }
}
