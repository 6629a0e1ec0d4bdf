use fixture::{Fixture, Network};
use orb_service_state::{
    config::TrackerConfig,
    host::{SubId, Timer},
    modem::{Indication, RadioState, Reply, Response, Token},
    power::{PowerState, REASON_RADIO_TURNED_OFF},
    state::RegState,
};
use std::sync::atomic::Ordering;

mod fixture;

fn registered(fx: &mut Fixture) {
    fx.radio_on();
    fx.respond_all(&Network::home());
}

#[test]
fn it_powers_off_right_away_when_data_is_already_down() {
    // Arrange
    let mut fx = Fixture::builder().build();
    registered(&mut fx);

    // Act
    fx.tracker.set_radio_power(false);

    // Assert
    assert_eq!(fx.modem.radio_power_calls(), vec![false]);
    assert_eq!(
        *fx.data.cleanups.lock().unwrap(),
        vec![REASON_RADIO_TURNED_OFF.to_string()]
    );
    assert!(fx.scheduler.power_off_tags().is_empty());
    assert!(!fx.tracker.desired_power());
}

#[test]
fn it_hangs_up_calls_before_powering_off() {
    let mut fx = Fixture::builder().build();
    registered(&mut fx);
    fx.calls.in_call.store(true, Ordering::SeqCst);

    fx.tracker.set_radio_power(false);

    assert_eq!(fx.calls.hangups.load(Ordering::SeqCst), 1);
    assert_eq!(fx.modem.radio_power_calls(), vec![false]);
}

#[test_log::test]
fn it_falls_back_to_powering_off_when_data_teardown_takes_too_long() {
    // Arrange
    let mut fx = Fixture::builder().data_connected(true).build();
    registered(&mut fx);

    // Act
    fx.tracker.set_radio_power(false);
    let pending_state = fx.tracker.power_state();
    let tags = fx.scheduler.power_off_tags();
    fx.tracker.handle_timer(Timer::PowerOffFallback { tag: 0 });
    let after_stale = fx.modem.radio_power_calls();
    fx.tracker.handle_timer(Timer::PowerOffFallback { tag: tags[0] });
    fx.tracker.handle_timer(Timer::PowerOffFallback { tag: tags[0] });

    // Assert
    assert_eq!(pending_state, PowerState::GracefulOffPending);
    assert_eq!(tags.len(), 1);
    assert!(after_stale.is_empty());
    assert_eq!(fx.modem.radio_power_calls(), vec![false]);
    assert_eq!(fx.tracker.power_state(), PowerState::On);
    assert!(fx.registry.registered.lock().unwrap().is_empty());
}

#[test]
fn it_waits_for_data_on_the_default_data_subscription() {
    // Arrange
    let mut fx = Fixture::builder()
        .data_connected(true)
        .dds(SubId(1))
        .build();
    registered(&mut fx);

    // Act
    fx.tracker.set_radio_power(false);
    let waiting = fx.modem.radio_power_calls();
    let registrant = fx.registry.registered.lock().unwrap().pop().unwrap();
    registrant.notify();
    let msg = fx.messages.try_recv().unwrap();
    fx.tracker.handle_message(msg);
    let tag = fx.scheduler.power_off_tags()[0];
    fx.tracker.handle_timer(Timer::PowerOffFallback { tag });

    // Assert
    assert!(waiting.is_empty());
    assert_eq!(fx.modem.radio_power_calls(), vec![false]);
    assert_eq!(fx.registry.unregistered.load(Ordering::SeqCst), 1);
    assert!(!fx.tracker.pending_power_off().is_pending());
}

#[test]
fn it_lets_a_pending_power_off_be_processed_early() {
    // Arrange
    let mut fx = Fixture::builder().data_connected(true).build();
    registered(&mut fx);
    fx.tracker.set_radio_power(false);
    let pending = fx.tracker.pending_power_off();
    let tag = fx.scheduler.power_off_tags()[0];

    // Act
    let processed = pending.process();
    let processed_again = fx.tracker.process_pending_power_off();
    fx.tracker.handle_timer(Timer::PowerOffFallback { tag });

    // Assert
    assert!(processed);
    assert!(!processed_again);
    assert_eq!(fx.modem.radio_power_calls(), vec![false]);
    assert!(pending.tag() > tag);
}

#[test]
fn it_ignores_the_fallback_timer_of_a_superseded_power_off() {
    // Arrange
    let mut fx = Fixture::builder().data_connected(true).build();
    registered(&mut fx);
    fx.tracker.set_radio_power(false);
    let first = fx.scheduler.power_off_tags()[0];
    fx.tracker.process_pending_power_off();

    // Act
    fx.tracker.set_radio_power(false);
    fx.tracker.handle_timer(Timer::PowerOffFallback { tag: first });

    // Assert
    let tags = fx.scheduler.power_off_tags();
    assert_eq!(tags.len(), 2);
    assert!(tags[1] > first);
    assert_eq!(fx.modem.radio_power_calls(), vec![false]);
    assert!(fx.tracker.pending_power_off().is_pending());
}

#[test]
fn it_powers_off_at_once_when_the_fallback_cannot_be_armed() {
    let mut fx = Fixture::builder().data_connected(true).build();
    registered(&mut fx);
    fx.scheduler.fail.store(true, Ordering::SeqCst);

    fx.tracker.set_radio_power(false);

    assert_eq!(fx.modem.radio_power_calls(), vec![false]);
    assert!(!fx.tracker.pending_power_off().is_pending());
}

#[test]
fn it_stops_waiting_on_the_default_data_subscription_when_the_fallback_cannot_be_armed() {
    // Arrange
    let mut fx = Fixture::builder()
        .data_connected(true)
        .dds(SubId(1))
        .build();
    registered(&mut fx);
    fx.scheduler.fail.store(true, Ordering::SeqCst);

    // Act
    fx.tracker.set_radio_power(false);

    // Assert
    assert_eq!(fx.registry.registered.lock().unwrap().len(), 1);
    assert_eq!(fx.registry.unregistered.load(Ordering::SeqCst), 1);
    assert_eq!(fx.modem.radio_power_calls(), vec![false]);
    assert!(!fx.tracker.pending_power_off().is_pending());
}

#[test]
fn it_shuts_the_modem_down_after_the_radio_is_off() {
    // Arrange
    let mut fx = Fixture::builder().build();
    registered(&mut fx);

    // Act
    fx.tracker.request_shutdown();
    let power_calls = fx.modem.radio_power_calls();
    fx.tracker.handle_response(Response::ok(
        Token::RadioPower { on: false },
        Reply::Ack,
    ));
    let shutdowns = fx.modem.shutdown_calls();
    fx.tracker
        .handle_indication(Indication::RadioStateChanged(RadioState::Off));

    // Assert
    assert_eq!(power_calls, vec![false]);
    assert_eq!(shutdowns, 1);
    assert_eq!(fx.tracker.power_state(), PowerState::ShuttingDown);
    assert!(fx.modem.take_poll_tokens().is_empty());
    assert_eq!(
        fx.tracker.service_state().voice_reg_state,
        RegState::PowerOff
    );
}

#[test]
fn it_shuts_down_directly_while_a_graceful_power_off_is_pending() {
    let mut fx = Fixture::builder().data_connected(true).build();
    registered(&mut fx);
    fx.tracker.set_radio_power(false);

    fx.tracker.request_shutdown();
    fx.tracker.request_shutdown();

    assert_eq!(fx.modem.shutdown_calls(), 1);
    assert!(fx.modem.radio_power_calls().is_empty());
}

#[test]
fn it_keeps_the_radio_off_while_the_carrier_disables_it() {
    // Arrange
    let mut fx = Fixture::builder().build();
    registered(&mut fx);

    // Act
    fx.tracker.set_radio_power_from_carrier(false);
    fx.tracker
        .handle_indication(Indication::RadioStateChanged(RadioState::Off));
    let while_disabled = fx.modem.radio_power_calls();
    fx.tracker.set_radio_power_from_carrier(true);

    // Assert
    assert_eq!(while_disabled, vec![false]);
    assert_eq!(fx.modem.radio_power_calls(), vec![false, true]);
    assert!(fx.tracker.desired_power());
}

#[test]
fn it_turns_the_radio_back_on_when_it_drops_while_wanted() {
    let mut fx = Fixture::builder().build();
    registered(&mut fx);

    fx.tracker
        .handle_indication(Indication::RadioStateChanged(RadioState::Off));

    assert_eq!(fx.modem.radio_power_calls(), vec![true]);
}

#[test]
fn it_delays_power_off_until_ims_deregisters() {
    // Arrange
    let mut fx = Fixture::builder()
        .config(TrackerConfig::builder().power_off_delay_needed(true).build())
        .build();
    registered(&mut fx);
    fx.tracker.set_ims_registration_state(true);

    // Act
    fx.tracker.set_radio_power(false);
    let delayed = fx.modem.radio_power_calls();
    fx.tracker.set_ims_registration_state(false);

    // Assert
    assert!(delayed.is_empty());
    assert!(fx.scheduler.timers().contains(&Timer::ImsRadioOff));
    assert!(
        fx.scheduler
            .cancelled
            .lock()
            .unwrap()
            .contains(&Timer::ImsRadioOff)
    );
    assert_eq!(fx.modem.radio_power_calls(), vec![false]);
}

#[test]
fn it_powers_off_when_the_ims_delay_expires() {
    let mut fx = Fixture::builder()
        .config(TrackerConfig::builder().power_off_delay_needed(true).build())
        .build();
    registered(&mut fx);
    fx.tracker.set_ims_registration_state(true);
    fx.tracker.set_radio_power(false);

    fx.tracker.handle_timer(Timer::ImsRadioOff);
    fx.tracker.handle_timer(Timer::ImsRadioOff);

    assert_eq!(fx.modem.radio_power_calls(), vec![false]);
}
