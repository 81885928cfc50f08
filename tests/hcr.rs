//! Hot code replace tests: redefinition eligibility, frame drops and the
//! specific-overrides-general listener precedence.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use jdwp_dispatch::common::HotCodeReplaceConfig;
use jdwp_dispatch::hcr::{HotCodeReplaceListener, ListenerScope, RedefinitionNotification};
use jdwp_dispatch::protocol::transport::Transport;
use jdwp_dispatch::protocol::{ClassId, ClassRef, RedefinedClass, TargetId, ThreadId};
use jdwp_dispatch::target::{MethodRef, StackFrame};
use jdwp_dispatch::testing::{RecordingHcrListener, RecordingTransport};
use jdwp_dispatch::{BreakpointRegistry, DebugTarget, Error, HotCodeReplaceCoordinator};

struct Fixture {
    target: Arc<DebugTarget>,
    transport: Arc<RecordingTransport>,
    coordinator: HotCodeReplaceCoordinator,
}

fn fixture() -> Fixture {
    fixture_with(HotCodeReplaceConfig::default())
}

fn fixture_with(config: HotCodeReplaceConfig) -> Fixture {
    let target = Arc::new(DebugTarget::new(TargetId(1), "debuggee"));
    let transport = Arc::new(RecordingTransport::new());
    let registry = Arc::new(BreakpointRegistry::new());
    let coordinator = HotCodeReplaceCoordinator::new(
        config,
        Arc::clone(&target),
        transport.clone() as Arc<dyn Transport>,
        registry,
    );
    Fixture {
        target,
        transport,
        coordinator,
    }
}

fn account_class() -> ClassRef {
    ClassRef::new(ClassId(11), "com.example.Account", "bank")
}

fn main_class() -> ClassRef {
    ClassRef::new(ClassId(99), "com.example.Main", "bank")
}

fn redefined(class: &ClassRef) -> RedefinedClass {
    RedefinedClass {
        class: class.clone(),
        bytecode: vec![0xCA, 0xFE, 0xBA, 0xBE],
    }
}

fn notification(class: &ClassRef) -> RedefinitionNotification {
    RedefinitionNotification {
        classes: vec![redefined(class)],
    }
}

/// A thread suspended in `Account.deposit` called from `Account.audit`
/// called from `Main.main`
fn suspend_in_account(fx: &Fixture, thread: ThreadId) {
    fx.target.add_thread(thread, "worker");
    fx.target.mark_thread_suspended(thread);
    fx.target
        .set_frames(
            thread,
            vec![
                StackFrame::new(account_class(), MethodRef::new("deposit", 30), 33),
                StackFrame::new(account_class(), MethodRef::new("audit", 20), 24),
                StackFrame::new(main_class(), MethodRef::new("main", 5), 9),
            ],
        )
        .unwrap();
}

#[tokio::test]
async fn test_specific_listener_preempts_general() {
    let fx = fixture();
    fx.target.class_loaded(account_class());

    let general = Arc::new(RecordingHcrListener::new());
    let specific = Arc::new(RecordingHcrListener::new());
    fx.coordinator
        .add_listener(general.clone(), ListenerScope::Global);
    fx.coordinator
        .add_listener(specific.clone(), ListenerScope::Target(fx.target.id()));

    fx.coordinator
        .classes_redefined(notification(&account_class()))
        .await
        .unwrap();

    assert_eq!(fx.transport.redefined_batches().len(), 1);
    assert!(specific.was_notified());
    assert!(!general.was_notified());
    assert_eq!(specific.succeeded_calls().len(), 1);
}

#[tokio::test]
async fn test_general_listener_fires_without_specific_one() {
    let fx = fixture();
    fx.target.class_loaded(account_class());
    let general = Arc::new(RecordingHcrListener::new());
    fx.coordinator
        .add_listener(general.clone(), ListenerScope::Global);
    // A listener bound to some other target never fires here
    let other = Arc::new(RecordingHcrListener::new());
    fx.coordinator
        .add_listener(other.clone(), ListenerScope::Target(TargetId(2)));

    fx.coordinator
        .classes_redefined(notification(&account_class()))
        .await
        .unwrap();

    assert!(general.was_notified());
    assert!(!other.was_notified());
}

#[tokio::test]
async fn test_same_named_class_in_other_binding_is_ignored() {
    let fx = fixture();
    fx.target.class_loaded(account_class());
    let listener = Arc::new(RecordingHcrListener::new());
    fx.coordinator
        .add_listener(listener.clone(), ListenerScope::Global);

    // Same qualified name, different loaded binding
    let stranger = ClassRef::new(ClassId(77), "com.example.Account", "other-workspace");
    fx.coordinator
        .classes_redefined(notification(&stranger))
        .await
        .unwrap();

    assert!(fx.transport.redefined_batches().is_empty());
    assert!(!listener.was_notified());
}

#[tokio::test]
async fn test_failed_redefinition_notifies_failure_only() {
    let fx = fixture();
    fx.target.class_loaded(account_class());
    suspend_in_account(&fx, ThreadId(7));
    let listener = Arc::new(RecordingHcrListener::new());
    fx.coordinator
        .add_listener(listener.clone(), ListenerScope::Global);
    fx.transport
        .fail_next_redefine(Error::redefinition("com.example.Account", "schema changed"));

    // Failure surfaces through the callback, never to the caller
    fx.coordinator
        .classes_redefined(notification(&account_class()))
        .await
        .unwrap();

    assert_eq!(listener.failed_calls().len(), 1);
    assert!(listener.succeeded_calls().is_empty());
    assert!(fx.transport.pop_calls().is_empty());
}

#[tokio::test]
async fn test_drops_to_deepest_obsolete_frame() {
    let fx = fixture();
    fx.target.class_loaded(account_class());
    suspend_in_account(&fx, ThreadId(7));
    let listener = Arc::new(RecordingHcrListener::new());
    fx.coordinator
        .add_listener(listener.clone(), ListenerScope::Global);

    // Both Account frames become obsolete; the drop re-enters `audit`,
    // the deepest of them, at its entry line
    let refreshed = vec![
        StackFrame::new(account_class(), MethodRef::new("audit", 20), 20),
        StackFrame::new(main_class(), MethodRef::new("main", 5), 9),
    ];
    fx.transport
        .script_pop_response(ThreadId(7), refreshed.clone());

    fx.coordinator
        .classes_redefined(notification(&account_class()))
        .await
        .unwrap();

    assert_eq!(fx.transport.pop_calls(), vec![(ThreadId(7), 1)]);
    assert_eq!(fx.target.frames(ThreadId(7)).unwrap(), refreshed);

    let obsolete = listener.obsolete_calls();
    assert_eq!(obsolete.len(), 1);
    let methods: Vec<&str> = obsolete[0].1.iter().map(|(_, m)| m.name.as_str()).collect();
    assert_eq!(methods, vec!["deposit", "audit"]);
    assert_eq!(listener.succeeded_calls().len(), 1);
}

#[tokio::test]
async fn test_retries_once_when_vm_reports_stale_stack() {
    let fx = fixture();
    fx.target.class_loaded(account_class());
    suspend_in_account(&fx, ThreadId(7));
    let listener = Arc::new(RecordingHcrListener::new());
    fx.coordinator
        .add_listener(listener.clone(), ListenerScope::Global);

    // First response is the pre-drop stack, second has landed at entry
    let stale = vec![StackFrame::new(
        account_class(),
        MethodRef::new("audit", 20),
        24,
    )];
    let settled = vec![StackFrame::new(
        account_class(),
        MethodRef::new("audit", 20),
        20,
    )];
    fx.transport.script_pop_response(ThreadId(7), stale);
    fx.transport.script_pop_response(ThreadId(7), settled.clone());

    fx.coordinator
        .classes_redefined(notification(&account_class()))
        .await
        .unwrap();

    assert_eq!(fx.transport.pop_calls().len(), 2);
    assert_eq!(fx.target.frames(ThreadId(7)).unwrap(), settled);
    assert_eq!(listener.succeeded_calls().len(), 1);
}

#[tokio::test]
async fn test_persistent_mismatch_gives_up_but_replace_succeeds() {
    let fx = fixture();
    fx.target.class_loaded(account_class());
    suspend_in_account(&fx, ThreadId(7));
    let listener = Arc::new(RecordingHcrListener::new());
    fx.coordinator
        .add_listener(listener.clone(), ListenerScope::Global);

    let stale = StackFrame::new(account_class(), MethodRef::new("audit", 20), 24);
    fx.transport.script_pop_response(ThreadId(7), vec![stale.clone()]);
    fx.transport.script_pop_response(ThreadId(7), vec![stale]);

    fx.coordinator
        .classes_redefined(notification(&account_class()))
        .await
        .unwrap();

    // One retry, then the drop is abandoned; the replace itself stands
    assert_eq!(fx.transport.pop_calls().len(), 2);
    assert!(listener.obsolete_calls().is_empty());
    assert_eq!(listener.succeeded_calls().len(), 1);
}

#[tokio::test]
async fn test_constructor_frame_reenters_at_body_start() {
    let fx = fixture();
    fx.target.class_loaded(account_class());
    fx.target.add_thread(ThreadId(7), "worker");
    fx.target.mark_thread_suspended(ThreadId(7));
    fx.target
        .set_frames(
            ThreadId(7),
            vec![
                StackFrame::new(account_class(), MethodRef::constructor(12), 15),
                StackFrame::new(main_class(), MethodRef::new("main", 5), 9),
            ],
        )
        .unwrap();
    let listener = Arc::new(RecordingHcrListener::new());
    fx.coordinator
        .add_listener(listener.clone(), ListenerScope::Global);

    let refreshed = vec![
        StackFrame::new(account_class(), MethodRef::constructor(12), 12),
        StackFrame::new(main_class(), MethodRef::new("main", 5), 9),
    ];
    fx.transport
        .script_pop_response(ThreadId(7), refreshed.clone());

    fx.coordinator
        .classes_redefined(notification(&account_class()))
        .await
        .unwrap();

    assert_eq!(fx.transport.pop_calls(), vec![(ThreadId(7), 0)]);
    assert_eq!(fx.target.frames(ThreadId(7)).unwrap(), refreshed);
    let obsolete = listener.obsolete_calls();
    assert!(obsolete[0].1[0].1.is_constructor);
}

#[tokio::test]
async fn test_frame_drop_disabled_by_config() {
    let fx = fixture_with(HotCodeReplaceConfig { drop_frames: false });
    fx.target.class_loaded(account_class());
    suspend_in_account(&fx, ThreadId(7));
    let listener = Arc::new(RecordingHcrListener::new());
    fx.coordinator
        .add_listener(listener.clone(), ListenerScope::Global);

    fx.coordinator
        .classes_redefined(notification(&account_class()))
        .await
        .unwrap();

    assert!(fx.transport.pop_calls().is_empty());
    assert!(listener.obsolete_calls().is_empty());
    assert_eq!(listener.succeeded_calls().len(), 1);
}

struct SelfRegisteringListener {
    coordinator: Arc<HotCodeReplaceCoordinator>,
    fired: AtomicUsize,
}

impl HotCodeReplaceListener for SelfRegisteringListener {
    fn replace_succeeded(&self, _target: TargetId, _classes: &[ClassRef]) {
        self.fired.fetch_add(1, Ordering::SeqCst);
        self.coordinator
            .add_listener(Arc::new(RecordingHcrListener::new()), ListenerScope::Global);
    }
}

#[tokio::test]
async fn test_listener_may_register_listeners_from_callback() {
    let target = Arc::new(DebugTarget::new(TargetId(1), "debuggee"));
    let transport = Arc::new(RecordingTransport::new());
    let coordinator = Arc::new(HotCodeReplaceCoordinator::new(
        HotCodeReplaceConfig::default(),
        Arc::clone(&target),
        transport.clone() as Arc<dyn Transport>,
        Arc::new(BreakpointRegistry::new()),
    ));
    let listener = Arc::new(SelfRegisteringListener {
        coordinator: Arc::clone(&coordinator),
        fired: AtomicUsize::new(0),
    });
    coordinator.add_listener(listener.clone(), ListenerScope::Global);
    target.class_loaded(account_class());

    coordinator
        .classes_redefined(notification(&account_class()))
        .await
        .unwrap();

    assert_eq!(listener.fired.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_running_threads_are_left_alone() {
    let fx = fixture();
    fx.target.class_loaded(account_class());
    // Thread is in Account code but not suspended
    fx.target.add_thread(ThreadId(9), "runner");
    fx.target
        .set_frames(
            ThreadId(9),
            vec![StackFrame::new(
                account_class(),
                MethodRef::new("deposit", 30),
                33,
            )],
        )
        .unwrap();

    fx.coordinator
        .classes_redefined(notification(&account_class()))
        .await
        .unwrap();

    assert!(fx.transport.pop_calls().is_empty());
    assert!(!fx.target.frames(ThreadId(9)).unwrap()[0].is_obsolete);
}
