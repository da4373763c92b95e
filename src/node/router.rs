use log::{debug, info};
use rand::Rng;
use tokio::time::Instant;

use super::Node;
use crate::error::NodeError;
use crate::protocol::trivia::{
    AnswerData, AnswerOkData, BodyData, CreateOkData, ForwardedData, HostActionData, JoinData,
    JoinOkData, Message, NextOkData, QuestionData,
};
use crate::protocol::NodeId;
use crate::session::{normalize_code, Command, CommandOutcome, SessionCode, SessionStore};

const SESSION_CODE_LEN: usize = 4;

impl Node {
    /// Runs a client mutation on the leader, relaying it there from a
    /// follower. A `forwarded` request is never relayed a second time.
    pub(super) async fn route(&self, request: &BodyData, forwarded: bool) -> BodyData {
        match self.route_request(request, forwarded).await {
            Ok(data) => data,
            Err(err) => {
                debug!("[{}] Request {request:?} failed: {err}", self.id());
                BodyData::Error(err.into())
            }
        }
    }

    async fn route_request(&self, request: &BodyData, forwarded: bool) -> Result<BodyData, NodeError> {
        let leader = {
            let core = self.core.lock().unwrap();
            if core.raft.is_leader() {
                None
            } else {
                Some(core.raft.get_leader_id().cloned())
            }
        };
        match leader {
            None => self.execute(request).await,
            Some(Some(leader)) if !forwarded => self.forward(leader, request).await,
            Some(leader) => Err(NodeError::NotLeader { leader }),
        }
    }

    /// Relays the request verbatim and returns the leader's reply unchanged.
    async fn forward(&self, leader: NodeId, request: &BodyData) -> Result<BodyData, NodeError> {
        debug!("[{}] Forwarding {request:?} to leader {leader}", self.id());
        let msg = Message::request(
            self.id().clone(),
            leader.clone(),
            BodyData::Forwarded(ForwardedData {
                request: Box::new(request.clone()),
            }),
        );
        let timeout = self.timing.commit_timeout() + self.timing.rpc_timeout();
        match self.sync_resp.send(self.transport.as_ref(), msg, timeout).await {
            Some(resp) => Ok(resp.body.data),
            None => Err(NodeError::Timeout(leader)),
        }
    }

    /// Appends the command on this node, the leader, and waits until it is
    /// applied.
    async fn execute(&self, request: &BodyData) -> Result<BodyData, NodeError> {
        if !self
            .liveness
            .has_quorum(Instant::now(), self.membership.majority())
        {
            return Err(NodeError::QuorumUnavailable);
        }
        let (entry, receiver) = {
            let mut core = self.core.lock().unwrap();
            let command = build_command(core.store.store(), request)?;
            core.store.store().validate(&command)?;
            let Some(proposal) = core.raft.propose(command) else {
                return Err(NodeError::NotLeader {
                    leader: core.raft.get_leader_id().cloned(),
                });
            };
            let receiver = core.pending.register(proposal.entry);
            self.handle_effects(&mut core, proposal.effects);
            (proposal.entry, receiver)
        };
        debug!(
            "[{}] Waiting for entry {} of term {}",
            self.id(),
            entry.index,
            entry.term
        );
        match tokio::time::timeout(self.timing.commit_timeout(), receiver).await {
            Ok(Ok(result)) => result.map(response_body),
            Ok(Err(_)) => Err(NodeError::NotLeader { leader: None }),
            Err(_) => {
                info!(
                    "[{}] Entry {} not committed within {:?}",
                    self.id(),
                    entry.index,
                    self.timing.commit_timeout()
                );
                self.core.lock().unwrap().pending.cancel(entry.index);
                Err(NodeError::QuorumUnavailable)
            }
        }
    }
}

fn build_command(store: &SessionStore, request: &BodyData) -> Result<Command, NodeError> {
    let command = match request {
        BodyData::Create => Command::CreateSession {
            code: fresh_session_code(store),
        },
        BodyData::Join(JoinData { code, nickname }) => Command::JoinSession {
            code: normalize_code(code),
            nickname: nickname.clone(),
        },
        BodyData::Start(HostActionData { code, player_id }) => Command::StartSession {
            code: normalize_code(code),
            player_id: *player_id,
        },
        BodyData::Next(HostActionData { code, player_id }) => Command::AdvanceQuestion {
            code: normalize_code(code),
            player_id: *player_id,
        },
        BodyData::Answer(AnswerData {
            code,
            player_id,
            answer_index,
        }) => Command::SubmitAnswer {
            code: normalize_code(code),
            player_id: *player_id,
            answer_index: *answer_index,
        },
        BodyData::End(HostActionData { code, player_id }) => Command::EndSession {
            code: normalize_code(code),
            player_id: *player_id,
        },
        other => {
            return Err(NodeError::MalformedRequest(format!(
                "{other:?} is not a session mutation"
            )))
        }
    };
    Ok(command)
}

fn fresh_session_code(store: &SessionStore) -> SessionCode {
    let mut rng = rand::thread_rng();
    loop {
        let code: SessionCode = (0..SESSION_CODE_LEN)
            .map(|_| rng.gen_range(b'A'..=b'Z') as char)
            .collect();
        if !store.contains(&code) {
            return code;
        }
    }
}

fn response_body(outcome: CommandOutcome) -> BodyData {
    match outcome {
        CommandOutcome::Created { code } => BodyData::CreateOk(CreateOkData { code }),
        CommandOutcome::Joined {
            player_id,
            players,
            is_host,
        } => BodyData::JoinOk(JoinOkData {
            players,
            new_player_id: player_id,
            is_host,
        }),
        CommandOutcome::Started { question } => BodyData::StartOk(QuestionData { question }),
        CommandOutcome::NextQuestion { question } => BodyData::NextOk(NextOkData {
            question: Some(question),
            game_over: false,
            scores: Vec::new(),
        }),
        CommandOutcome::GameOver { scores } => BodyData::NextOk(NextOkData {
            question: None,
            game_over: true,
            scores,
        }),
        CommandOutcome::Answered { correct, score } => {
            BodyData::AnswerOk(AnswerOkData { correct, score })
        }
        CommandOutcome::Ended => BodyData::EndOk,
    }
}
