use openid4vc::{
    core::{
        response::AuthorizationResponse,
        sd_jwt::{CryptoError, SdJwt},
    },
    holder::{FieldSelection, StorageProvider},
    issuer::{CredentialResponse, ProtocolError},
    verifier::{
        merge_claims,
        session::{Outcome, Status},
        VerificationError,
    },
};


use sd_jwt_vc::*;

#[tokio::test]
async fn sd_jwt_vc_issue_and_present_direct_post() {
    let issuer = LocalIssuer::new();
    let holder = holder();
    let verifier = verifier(&issuer);

    // Requests stay pending for the issuer's review window.
    let tokens = issuer.authorize(bob()).await;
    let acquired = holder.acquire_credentials(&issuer, &tokens).await.unwrap();
    assert_eq!(acquired.len(), 1);
    assert!(!acquired[0].is_issued());
    let refresh = holder.refresh_all_deferred(&issuer).await.unwrap();
    assert!(refresh.issued.is_empty() && refresh.denied.is_empty());

    issuer.advance(40);
    let issued = holder.refresh_all_deferred(&issuer).await.unwrap().issued;
    assert_eq!(issued.len(), 1);
    let credential = issued[0].sd_jwt().unwrap().unwrap();
    assert_eq!(credential.disclosures().len(), 2);
    let payload = credential.payload_unverified().unwrap();
    assert_eq!(payload["vct"], "Identity");
    assert!(payload.contains_key("cnf"));

    let (uuid, request) = verifier.authorization_request("age", None).await.unwrap();
    let requested = holder.requested_fields(&request.presentation_definition);
    let labels: Vec<_> = requested.iter().map(|field| field.label.as_str()).collect();
    assert_eq!(labels, ["Given Name", "Dob"]);

    // Bob only agrees to share his date of birth.
    let selection = FieldSelection::new().approve_labels(&request.presentation_definition, &["Dob"]);
    let response = holder.present(&request, &selection).await.unwrap();

    let body = response.as_form().unwrap();
    let response = AuthorizationResponse::from_form(&body).unwrap();
    let presentation = SdJwt::parse(&response.vp_token.presentations()[0]).unwrap();
    assert_eq!(presentation.disclosures().len(), 1);
    assert!(presentation.key_binding().is_some());

    let outcome = verifier.verify_response(&response).await.unwrap();
    let Outcome::Success { presentations } = &outcome else {
        panic!("expected success, got {outcome:?}");
    };
    let claims = merge_claims(presentations);
    assert_eq!(claims["dob"], "1970-01-01");
    assert_eq!(claims["vct"], "Identity");
    assert!(!claims.contains_key("given_name"));

    let status = verifier.poll_status(uuid).await.unwrap();
    assert!(matches!(status, Status::Complete(Outcome::Success { .. })));

    // The same response cannot be replayed.
    assert!(verifier.verify_response(&response).await.is_err());
}

#[tokio::test]
async fn pending_request_shares_one_transaction() {
    let issuer = LocalIssuer::new();
    let tokens = issuer.authorize(bob()).await;
    let credential_identifier = tokens.credential_identifier().unwrap();

    let mut locked = issuer.issuer.lock().await;
    let first = locked
        .request_credential(&tokens.access_token, credential_identifier, None)
        .unwrap();
    let second = locked
        .request_credential(&tokens.access_token, credential_identifier, None)
        .unwrap();
    assert_eq!(first, second);
    let CredentialResponse::Deferred { transaction_id } = first else {
        panic!("expected a deferred response");
    };
    assert_eq!(
        locked.deferred_credential(&tokens.access_token, &transaction_id),
        Err(ProtocolError::IssuancePending)
    );
    drop(locked);

    issuer.advance(40);
    let mut locked = issuer.issuer.lock().await;
    let issued = locked
        .deferred_credential(&tokens.access_token, &transaction_id)
        .unwrap();
    assert!(matches!(issued, CredentialResponse::Issued { .. }));
    assert_eq!(
        locked.deferred_credential(&tokens.access_token, &transaction_id),
        Err(ProtocolError::InvalidTransactionId)
    );
}

#[tokio::test]
async fn denied_request_is_never_presented() {
    let issuer = LocalIssuer::new();
    let holder = holder();
    let verifier = verifier(&issuer);

    let tokens = issuer.authorize(bob()).await;
    holder.acquire_credentials(&issuer, &tokens).await.unwrap();
    issuer
        .issuer
        .lock()
        .await
        .deny(tokens.credential_identifier().unwrap())
        .unwrap();
    issuer.advance(40);

    let refresh = holder.refresh_all_deferred(&issuer).await.unwrap();
    assert!(refresh.issued.is_empty());
    assert_eq!(refresh.denied.len(), 1);
    assert!(holder.storage().get_deferred().await.unwrap().is_empty());

    // Once denied, the credential is no longer polled.
    let refresh = holder.refresh_all_deferred(&issuer).await.unwrap();
    assert!(refresh.denied.is_empty());
    let err = holder
        .refresh_credential(&issuer, tokens.credential_identifier().unwrap())
        .await
        .unwrap_err();
    assert_eq!(
        err.downcast_ref::<ProtocolError>(),
        Some(&ProtocolError::CredentialRequestDenied)
    );

    let (_, request) = verifier.authorization_request("age", None).await.unwrap();
    let selection = FieldSelection::approve_all(&request.presentation_definition);
    assert!(holder.present(&request, &selection).await.is_err());
}

#[tokio::test]
async fn presentation_bound_to_another_verifier_fails() {
    let issuer = LocalIssuer::new();
    let holder = holder();
    let verifier = verifier(&issuer);

    issuer.advance(40);
    let tokens = issuer.authorize(bob()).await;
    issuer.advance(40);
    let acquired = holder.acquire_credentials(&issuer, &tokens).await.unwrap();
    assert!(acquired[0].is_issued());

    let (uuid, request) = verifier.authorization_request("age", None).await.unwrap();
    let mut forwarded = request.clone();
    forwarded.client_id = "did:web:eavesdropper.example".into();
    let selection = FieldSelection::approve_all(&request.presentation_definition);
    let response = holder.present(&forwarded, &selection).await.unwrap();

    let outcome = verifier.verify_response(&response).await.unwrap();
    assert!(matches!(
        outcome,
        Outcome::Failure {
            reason: VerificationError::Credential {
                error: CryptoError::KeyBindingInvalid(_),
                ..
            }
        }
    ));
    assert!(matches!(
        verifier.poll_status(uuid).await.unwrap(),
        Status::Complete(Outcome::Failure { .. })
    ));
}
