// Property tests: any graph of pending users and posts flushes in one go,
// whatever order it was added in and whatever mentor cycles it contains.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use common::{blog_registry, memory_session};
use keel_core::{InstanceHandle, NewInstance, Value};
use proptest::prelude::*;

/// `(mentor of each user, author of each post, order users are added in)`
fn graph() -> impl Strategy<Value = (Vec<Option<usize>>, Vec<usize>, Vec<usize>)> {
    (1usize..7).prop_flat_map(|users| {
        (
            prop::collection::vec(prop::option::of(0..users), users),
            prop::collection::vec(0..users, 0..5),
            Just((0..users).collect::<Vec<_>>()).prop_shuffle(),
        )
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn prop_any_pending_graph_flushes(graph in graph()) {
        let (mentors, authors, order) = graph;
        let registry = blog_registry();
        let mut session = memory_session(&registry);

        let mut users: Vec<Option<InstanceHandle>> = vec![None; mentors.len()];
        for &i in &order {
            let handle = session
                .add(NewInstance::new("User").set("email", format!("u{}@x.com", i)))
                .unwrap();
            users[i] = Some(handle);
        }
        let users: Vec<InstanceHandle> = users.into_iter().map(Option::unwrap).collect();
        for (i, mentor) in mentors.iter().enumerate() {
            if let Some(m) = mentor {
                session.link(users[i], "mentor", users[*m]).unwrap();
            }
        }
        let posts: Vec<InstanceHandle> = authors
            .iter()
            .enumerate()
            .map(|(n, a)| {
                session
                    .add(
                        NewInstance::new("Post")
                            .set("title", format!("p{}", n))
                            .link("author", users[*a]),
                    )
                    .unwrap()
            })
            .collect();

        let report = session.flush().unwrap();

        prop_assert_eq!(report.inserted, users.len() + posts.len());
        for (i, mentor) in mentors.iter().enumerate() {
            let stored = session.value(users[i], "mentor_id").unwrap();
            match mentor {
                Some(m) => {
                    prop_assert_eq!(stored, session.value(users[*m], "id").unwrap());
                }
                None => {
                    prop_assert_eq!(stored, Value::Null);
                }
            }
        }
        for (post, author) in posts.iter().zip(&authors) {
            prop_assert_eq!(
                session.value(*post, "author_id").unwrap(),
                session.value(users[*author], "id").unwrap()
            );
        }
        prop_assert!(session.pending_changes().is_empty());
    }
}
