use std::sync::Weak;

use tokio::select;
use tokio::sync::{mpsc, watch};

use crate::mailbox::Mailbox;
use crate::{Actor, Message};

pub async fn run_actor<S: Send + 'static>(
    mailbox: Weak<Mailbox<S>>,
    mut state: S,
    mut msg_rx: mpsc::UnboundedReceiver<Box<dyn Message<S>>>,
    mut kill_rx: watch::Receiver<bool>,
) {
    debug!("started");
    let mut handled = 0u64;
    loop {
        let msg = select! {
            biased;

            _ = kill_rx.changed() => {
                debug!("killed");
                break;
            }
            msg = msg_rx.recv() => {
                let Some(msg) = msg else {
                    break;
                };
                msg
            }
        };
        trace!("received message: {msg:?}");

        // Handlers get a strong handle so they can post follow-up messages,
        // but the loop itself must not keep the mailbox alive.
        let Some(mailbox) = mailbox.upgrade() else {
            warn!("all handles have been dropped, discarding message");
            break;
        };
        let handle = Actor::from_mailbox(mailbox);
        trace_span!("handle", seq = handled).in_scope(|| {
            msg.handle(&mut state, &handle);
        });
        handled += 1;
    }
    msg_rx.close();
    debug!(handled, "stopped");
}
