//! Drives one streamed reply at a time into the transcript

use crate::llm::ModelClient;
use crate::prompts::{self, INIT_ERROR_ID, INIT_ERROR_TEXT};
use crate::streaming::{Fragment, FragmentStream, Pull};
use crate::transcript::{ChatTurn, MessageStore, Sender, TurnId};

/// What `submit` did with the text it was given
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Turns appended and a reply is streaming into the placeholder
    Started(TurnId),
    /// Nothing left after trimming
    Empty,
    /// A reply is still streaming; the submission was dropped
    Busy,
}

/// Observable change to the transcript caused by the in-flight reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControllerUpdate {
    /// Placeholder text grew by `delta`
    Streaming { id: TurnId, delta: String },
    Completed { id: TurnId },
    Failed { id: TurnId, message: String },
}

impl ControllerUpdate {
    #[cfg(test)]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ControllerUpdate::Streaming { .. })
    }
}

struct InFlight {
    turn_id: TurnId,
    accumulated: String,
    fragments: FragmentStream,
}

/// Owns the transcript and the model session for one chat.
///
/// Busy exactly while a reply stream is held; only one can be held at a time.
pub struct ConversationController<C: ModelClient> {
    client: C,
    store: MessageStore,
    in_flight: Option<InFlight>,
}

impl<C: ModelClient> ConversationController<C> {
    pub fn new(client: C) -> Self {
        Self {
            client,
            store: MessageStore::seeded(prompts::welcome_turn()),
            in_flight: None,
        }
    }

    /// Open the model session up front.
    ///
    /// On failure a terminal error turn is appended; later submissions retry
    /// the connection.
    pub fn initialize(&mut self) -> bool {
        match self.client.connect() {
            Ok(()) => true,
            Err(err) => {
                tracing::error!(error = %err, "failed to initialize chat session");
                let init_error = TurnId::from(INIT_ERROR_ID);
                if self.store.get(&init_error).is_none() {
                    self.append(ChatTurn::new(init_error, INIT_ERROR_TEXT, Sender::Error));
                }
                false
            }
        }
    }

    pub fn submit(&mut self, text: &str) -> SubmitOutcome {
        if self.is_busy() {
            tracing::debug!("ignoring submission while a reply is streaming");
            return SubmitOutcome::Busy;
        }

        let text = text.trim();
        if text.is_empty() {
            return SubmitOutcome::Empty;
        }

        self.append(ChatTurn::user(text));
        let placeholder = ChatTurn::placeholder();
        let turn_id = placeholder.id.clone();
        self.append(placeholder);

        tracing::info!(turn = %turn_id, chars = text.len(), "submitting turn");
        let fragments = self.client.send_turn(text);
        self.in_flight = Some(InFlight {
            turn_id: turn_id.clone(),
            accumulated: String::new(),
            fragments,
        });

        SubmitOutcome::Started(turn_id)
    }

    /// Apply every fragment already received without waiting for more
    pub fn poll(&mut self) -> Vec<ControllerUpdate> {
        let mut updates = Vec::new();

        while let Some(in_flight) = self.in_flight.as_mut() {
            let update = match in_flight.fragments.try_next() {
                Pull::Ready(fragment) => self.apply(fragment),
                Pull::Pending => break,
                Pull::Closed => Some(self.complete()),
            };
            updates.extend(update);
        }

        updates
    }

    /// Wait for the next change; `None` when nothing is streaming
    pub async fn next_update(&mut self) -> Option<ControllerUpdate> {
        loop {
            let in_flight = self.in_flight.as_mut()?;
            let update = match in_flight.fragments.next_fragment().await {
                Some(fragment) => self.apply(fragment),
                None => Some(self.complete()),
            };
            if update.is_some() {
                return update;
            }
        }
    }

    /// Run the in-flight reply to its end and return the terminal update
    #[cfg(test)]
    pub async fn drive(&mut self) -> Option<ControllerUpdate> {
        let mut last = None;
        while let Some(update) = self.next_update().await {
            last = Some(update);
        }
        last
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight.is_some()
    }

    pub fn transcript(&self) -> &MessageStore {
        &self.store
    }

    pub fn model(&self) -> &str {
        self.client.model()
    }

    #[cfg(test)]
    pub fn client(&self) -> &C {
        &self.client
    }

    fn apply(&mut self, fragment: Fragment) -> Option<ControllerUpdate> {
        match fragment {
            Fragment::Text(delta) => {
                if delta.is_empty() {
                    return None;
                }
                let in_flight = self.in_flight.as_mut()?;
                in_flight.accumulated.push_str(&delta);
                let id = in_flight.turn_id.clone();
                if let Err(err) = self.store.update(&id, in_flight.accumulated.clone(), None) {
                    tracing::error!(error = %err, "could not update streaming turn");
                }
                Some(ControllerUpdate::Streaming { id, delta })
            }
            Fragment::Failed(err) => Some(self.fail(err.to_string())),
        }
    }

    fn complete(&mut self) -> ControllerUpdate {
        let (id, accumulated) = self.finish();
        tracing::info!(turn = %id, chars = accumulated.len(), "reply complete");
        ControllerUpdate::Completed { id }
    }

    /// The error text replaces whatever had streamed so far.
    fn fail(&mut self, message: String) -> ControllerUpdate {
        let (id, accumulated) = self.finish();
        tracing::warn!(
            turn = %id,
            error = %message,
            discarded_chars = accumulated.len(),
            "reply failed"
        );

        let text = prompts::failure_text(&message);
        if let Err(err) = self.store.update(&id, text, Some(Sender::Error)) {
            tracing::error!(error = %err, "could not mark turn as failed");
        }
        ControllerUpdate::Failed { id, message }
    }

    /// Release the in-flight stream; both terminal paths go through here
    fn finish(&mut self) -> (TurnId, String) {
        match self.in_flight.take() {
            Some(in_flight) => (in_flight.turn_id, in_flight.accumulated),
            None => (TurnId::from(""), String::new()),
        }
    }

    fn append(&mut self, turn: ChatTurn) {
        if let Err(err) = self.store.append(turn) {
            tracing::error!(error = %err, "could not append turn");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ModelError;
    use crate::streaming::FragmentSender;
    use std::sync::{Arc, Mutex};

    /// Hands every reply stream's sender to the test
    #[derive(Default)]
    struct ScriptedClient {
        connect_error: Option<ModelError>,
        requests: Arc<Mutex<Vec<String>>>,
        senders: Arc<Mutex<Vec<FragmentSender>>>,
    }

    impl ModelClient for ScriptedClient {
        fn connect(&mut self) -> Result<(), ModelError> {
            match &self.connect_error {
                Some(err) => Err(err.clone()),
                None => Ok(()),
            }
        }

        fn send_turn(&mut self, text: &str) -> FragmentStream {
            if let Err(err) = self.connect() {
                return FragmentStream::failed(err);
            }
            self.requests.lock().unwrap().push(text.to_string());
            let (tx, stream) = FragmentStream::channel();
            self.senders.lock().unwrap().push(tx);
            stream
        }

        fn model(&self) -> &str {
            "scripted"
        }
    }

    fn controller() -> ConversationController<ScriptedClient> {
        ConversationController::new(ScriptedClient::default())
    }

    fn take_sender(controller: &ConversationController<ScriptedClient>) -> FragmentSender {
        controller.client().senders.lock().unwrap().pop().unwrap()
    }

    fn texts(controller: &ConversationController<ScriptedClient>) -> Vec<(Sender, String)> {
        controller
            .transcript()
            .turns()
            .iter()
            .map(|turn| (turn.sender, turn.text.clone()))
            .collect()
    }

    #[tokio::test]
    async fn streams_fragments_into_placeholder() {
        let mut controller = controller();
        assert!(!controller.is_busy());

        let outcome = controller.submit("How can I sleep better?");
        let SubmitOutcome::Started(id) = outcome else {
            panic!("expected submission to start, got {:?}", outcome);
        };
        assert!(controller.is_busy());
        assert_eq!(controller.transcript().get(&id).unwrap().text, "");

        let tx = take_sender(&controller);
        let mut seen = Vec::new();
        for fragment in ["Try ", "a consistent ", "bedtime."] {
            tx.text(fragment).await;
            let updates = controller.poll();
            assert_eq!(updates.len(), 1);
            seen.push(controller.transcript().get(&id).unwrap().text.clone());
            assert!(controller.is_busy());
        }
        assert_eq!(seen, vec!["Try ", "Try a consistent ", "Try a consistent bedtime."]);

        drop(tx);
        assert_eq!(controller.poll(), vec![ControllerUpdate::Completed { id: id.clone() }]);
        assert!(!controller.is_busy());

        let turns = texts(&controller);
        assert_eq!(turns.len(), 3);
        assert_eq!(turns[1], (Sender::User, "How can I sleep better?".to_string()));
        assert_eq!(turns[2], (Sender::Assistant, "Try a consistent bedtime.".to_string()));
        assert_eq!(
            *controller.client().requests.lock().unwrap(),
            vec!["How can I sleep better?".to_string()]
        );
    }

    #[tokio::test]
    async fn final_text_is_concatenation_of_fragments() {
        let cases: Vec<Vec<&str>> = vec![
            vec!["a"],
            vec!["multi\nline ", "", "reply"],
            vec!["é", "t", "é ", "🌙"],
        ];

        for fragments in cases {
            let mut controller = controller();
            let SubmitOutcome::Started(id) = controller.submit("q") else {
                panic!("submission did not start");
            };
            let tx = take_sender(&controller);
            for fragment in &fragments {
                tx.text(*fragment).await;
            }
            drop(tx);
            controller.poll();

            assert_eq!(controller.transcript().get(&id).unwrap().text, fragments.concat());
            assert!(!controller.is_busy());
        }
    }

    #[tokio::test]
    async fn overlapping_submit_is_ignored() {
        let mut controller = controller();
        controller.submit("first");
        let tx = take_sender(&controller);
        tx.text("partial").await;
        controller.poll();
        let before = texts(&controller);

        assert_eq!(controller.submit("second"), SubmitOutcome::Busy);
        assert_eq!(texts(&controller), before);
        assert_eq!(controller.client().requests.lock().unwrap().len(), 1);

        tx.text(" reply").await;
        drop(tx);
        controller.poll();
        assert_eq!(texts(&controller).last().unwrap().1, "partial reply");
    }

    #[test]
    fn blank_submit_is_rejected() {
        let mut controller = controller();
        assert_eq!(controller.submit("   \n\t"), SubmitOutcome::Empty);
        assert_eq!(controller.transcript().len(), 1);
        assert!(!controller.is_busy());
    }

    #[test]
    fn user_text_is_trimmed() {
        let mut controller = controller();
        controller.submit("  hello  ");
        assert_eq!(texts(&controller)[1].1, "hello");
        assert_eq!(controller.client().requests.lock().unwrap()[0], "hello");
    }

    #[tokio::test]
    async fn mid_stream_failure_replaces_text_with_error() {
        let mut controller = controller();
        let SubmitOutcome::Started(id) = controller.submit("hi") else {
            panic!("submission did not start");
        };
        let tx = take_sender(&controller);
        tx.text("Hello").await;
        tx.fail(ModelError::Transport("overloaded".into())).await;

        let updates = controller.poll();
        assert_eq!(
            updates.last(),
            Some(&ControllerUpdate::Failed {
                id: id.clone(),
                message: "overloaded".into()
            })
        );
        assert!(!controller.is_busy());

        let turn = controller.transcript().get(&id).unwrap();
        assert_eq!(turn.sender, Sender::Error);
        assert_eq!(turn.text, "Error: overloaded. Please try again.");

        let failed = controller
            .transcript()
            .turns()
            .iter()
            .filter(|turn| turn.sender == Sender::Error)
            .count();
        assert_eq!(failed, 1);

        // fragments after the failure never reach the terminal turn
        tx.text("late").await;
        assert!(controller.poll().is_empty());
        assert_eq!(controller.transcript().get(&id).unwrap().text, "Error: overloaded. Please try again.");
    }

    #[tokio::test]
    async fn usable_again_after_failure() {
        let mut controller = controller();
        controller.submit("one");
        take_sender(&controller)
            .fail(ModelError::Transport("network down".into()))
            .await;
        controller.poll();

        let SubmitOutcome::Started(id) = controller.submit("two") else {
            panic!("retry was not accepted");
        };
        let tx = take_sender(&controller);
        tx.text("ok").await;
        drop(tx);
        controller.poll();
        assert_eq!(controller.transcript().get(&id).unwrap().sender, Sender::Assistant);
        assert_eq!(controller.transcript().len(), 5);
    }

    #[tokio::test]
    async fn empty_stream_completes_with_empty_reply() {
        let mut controller = controller();
        let SubmitOutcome::Started(id) = controller.submit("q") else {
            panic!("submission did not start");
        };
        drop(take_sender(&controller));

        assert_eq!(controller.drive().await, Some(ControllerUpdate::Completed { id: id.clone() }));
        assert_eq!(controller.transcript().get(&id).unwrap().text, "");
        assert_eq!(controller.transcript().get(&id).unwrap().sender, Sender::Assistant);
    }

    #[test]
    fn missing_credentials_surface_at_initialization() {
        let client = ScriptedClient {
            connect_error: Some(ModelError::Configuration(
                "API_KEY environment variable not set.".into(),
            )),
            ..ScriptedClient::default()
        };
        let mut controller = ConversationController::new(client);

        assert!(!controller.initialize());
        assert!(!controller.initialize());
        let errors: Vec<_> = controller
            .transcript()
            .turns()
            .iter()
            .filter(|turn| turn.sender == Sender::Error)
            .collect();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].text.contains("Could not initialize"));

        let SubmitOutcome::Started(id) = controller.submit("hello") else {
            panic!("submission did not start");
        };
        controller.poll();
        assert!(!controller.is_busy());
        assert_eq!(
            controller.transcript().get(&id).unwrap().text,
            "Error: API_KEY environment variable not set.. Please try again."
        );
        assert!(controller.client().requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn next_update_follows_a_live_stream() {
        let mut controller = controller();
        let SubmitOutcome::Started(id) = controller.submit("hello") else {
            panic!("submission did not start");
        };
        let tx = take_sender(&controller);
        tokio::spawn(async move {
            for part in ["Hi", " there"] {
                tx.text(part).await;
                tokio::task::yield_now().await;
            }
        });

        let mut deltas = Vec::new();
        while let Some(update) = controller.next_update().await {
            assert!(controller.is_busy() || update.is_terminal());
            if let ControllerUpdate::Streaming { delta, .. } = update {
                deltas.push(delta);
            }
        }
        assert_eq!(deltas, vec!["Hi", " there"]);
        assert_eq!(controller.transcript().get(&id).unwrap().text, "Hi there");
        assert!(controller.next_update().await.is_none());
    }
}
