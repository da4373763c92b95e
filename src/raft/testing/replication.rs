#[cfg(test)]
mod replication_tests {
    use crate::raft::testing::{
        driver::{
            DEFAULT_ELECTION_TIMEOUT, DEFAULT_HEARTBEAT_INTERVAL, DEFAULT_RPC_LATENCY,
            DEFAULT_WAIT_TIMEOUT,
        },
        driver_utils::{start_default_cluster, start_default_cluster_with_leader, DriverExt},
    };

    #[test]
    pub fn propose_single_value_from_leader() {
        let mut driver = start_default_cluster();
        let leader = driver.wait_for_leader();
        assert!(driver.propose_value(&leader, 42));
        driver.advance_time(DEFAULT_RPC_LATENCY);
        assert!(driver.get_committed_values(&leader).is_empty());
        driver.advance_time(DEFAULT_RPC_LATENCY);
        assert_eq!(driver.get_committed_values(&leader), &vec![42]);
        driver.advance_time(DEFAULT_HEARTBEAT_INTERVAL + DEFAULT_RPC_LATENCY);
        for node in driver.get_all_nodes() {
            assert_eq!(driver.get_committed_values(&node), &vec![42]);
        }
    }

    #[test]
    pub fn follower_refuses_proposals() {
        let mut driver = start_default_cluster_with_leader();
        let follower = driver.get_any_follower();
        assert!(!driver.propose_value(&follower, 42));
        driver.advance_time(10 * DEFAULT_RPC_LATENCY);
        for node in driver.get_all_nodes() {
            assert!(driver.get_committed_values(&node).is_empty());
            assert!(driver.get_log(&node).is_empty());
        }
    }

    #[test]
    pub fn values_commit_in_proposal_order() {
        let mut driver = start_default_cluster_with_leader();
        let leader = driver.get_leader();
        for value in 1..=5 {
            assert!(driver.propose_value(&leader, value));
        }
        let follower = driver.get_any_follower();
        driver.wait_node_value_committed(follower.clone(), 5);
        assert_eq!(driver.get_committed_values(&follower), vec![1, 2, 3, 4, 5]);
        assert_eq!(driver.get_committed_values(&leader), vec![1, 2, 3, 4, 5]);
    }

    #[test]
    pub fn no_commit_without_quorum() {
        let mut driver = start_default_cluster_with_leader();
        let leader = driver.get_leader();
        for node in driver.get_followers() {
            driver.disconnect_node(node);
        }
        assert!(driver.propose_value(&leader, 7));
        driver.advance_time(DEFAULT_ELECTION_TIMEOUT / 4);
        assert!(driver.get_committed_values(&leader).is_empty());
        assert_eq!(driver.get_raft_state(&leader).get_commit_index(), 0);
        driver.connect_all_nodes();
        driver.wait_node_value_committed(leader.clone(), 7);
    }

    #[test]
    pub fn lagging_follower_catches_up() {
        let mut driver = start_default_cluster_with_leader();
        let leader = driver.get_leader();
        let lagging = driver.get_any_follower();
        driver.disconnect_node(lagging.clone());
        for value in 1..=3 {
            assert!(driver.propose_value(&leader, value));
        }
        driver.wait_node_value_committed(leader.clone(), 3);
        assert!(driver.get_committed_values(&lagging).is_empty());
        driver.connect_node(lagging.clone());
        driver.wait_node_value_committed(lagging.clone(), 3);
        assert_eq!(driver.get_committed_values(&lagging), vec![1, 2, 3]);
    }

    #[test]
    pub fn drop_value_after_reconnect() {
        let mut driver = start_default_cluster();
        let old_leader = driver.wait_for_leader();
        driver.disconnect_node(old_leader.clone());
        assert!(driver.propose_value(&old_leader, 1));
        assert!(
            driver.wait(
                |driver| driver.get_leaders().len() == 2,
                DEFAULT_WAIT_TIMEOUT
            ),
            "New leader should be elected"
        );
        let new_leader = driver
            .get_leaders()
            .into_iter()
            .find(|node| node != &old_leader)
            .unwrap();
        let new_term = driver.get_raft_state(&new_leader).get_current_term();
        let follower = driver.get_any_follower();
        assert!(driver.propose_value(&new_leader, 2));
        driver.wait_node_value_committed(follower.clone(), 2);
        assert!(driver.get_committed_values(&old_leader).is_empty());
        driver.connect_node(old_leader.clone());
        driver.wait_node_value_committed(old_leader.clone(), 2);
        assert_eq!(driver.get_committed_values(&old_leader), vec![2]);
        let old_leader_log = driver.get_log(&old_leader);
        assert_eq!(old_leader_log.len(), 1);
        assert_eq!(old_leader_log[0].data, 2);
        assert_eq!(old_leader_log[0].term, new_term);
    }

    #[test]
    pub fn should_not_commit_with_older_term() {
        let mut driver = start_default_cluster();
        let leader = driver.wait_for_leader();
        let follower = driver.get_any_follower();
        driver.disconnect_all_nodes();
        assert!(driver.propose_value(&leader, 42));
        driver.advance_time(10 * DEFAULT_ELECTION_TIMEOUT);
        driver.connect_nodes(leader.clone(), follower.clone());
        assert_eq!(
            driver.wait_for_leader(),
            leader,
            "The same leader should be elected after reconnect due to longer log len"
        );
        driver.advance_time(10 * DEFAULT_ELECTION_TIMEOUT);
        assert!(
            driver.get_committed_values(&leader).is_empty(),
            "Should not commit entries with a previous term"
        );
        assert!(driver.propose_value(&leader, 740));
        driver.wait_node_value_committed(leader.clone(), 740);
        assert_eq!(driver.get_committed_values(&leader), vec![42, 740]);
        driver.wait_node_value_committed(follower.clone(), 740);
        assert_eq!(driver.get_committed_values(&follower), vec![42, 740]);
    }
}
