fn main() {
    #[cfg(feature = "soapysdr")]
    {
        println!("cargo:rustc-link-lib=SoapySDR");
    }
}
